//! The runtime: container table, registry, type bindings and job limits.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use rpak_common::PakGuid;
use rpak_format::{Compression, PagePtr};

use crate::alloc::PageAllocator;
use crate::bindings::{AssetBinding, TypeBindings};
use crate::config::{unqualified, PakConfig, PakPaths};
use crate::error::{BindingError, ConfigError, LoadError};
use crate::io::{AsyncIo, IoPriority, ThreadedFileIo};
use crate::jobs::{JobDispatcher, JobLimiter, RayonDispatcher};
use crate::loader::{LoadContext, LoadedPak, PakSignals};
use crate::registry::{AssetRegistry, RegistryEntry};
use crate::streaming::{InstallProgress, StreamingSets};
use crate::{LoadFlags, PakHandle, PakStatus};

/// Pause between polls in [`PakRuntime::wait`] when nothing moved.
const WAIT_INTERVAL: Duration = Duration::from_micros(200);

/// Summary of one container.
#[derive(Debug, Clone)]
pub struct PakInfo {
    pub handle: PakHandle,
    pub name: String,
    pub status: PakStatus,
    /// File the container was read from, once opened.
    pub path: Option<PathBuf>,
    pub compression: Option<Compression>,
    pub patched: bool,
    pub asset_count: usize,
    pub page_count: usize,
    pub page_bytes: u64,
    pub dependents: u32,
    pub streaming_files: usize,
    pub error: Option<String>,
}

struct PakSlot {
    handle: PakHandle,
    signals: Arc<PakSignals>,
    pak: Mutex<LoadedPak>,
}

/// Loads containers and owns everything they publish.
///
/// Containers advance when driven: [`tick`](Self::tick) drives all of them,
/// [`drive`](Self::drive) and [`wait`](Self::wait) a single one. Each
/// container has its own lock, so different containers may be driven from
/// different threads at the same time.
///
/// ```
/// use std::sync::Arc;
/// use rpak_runtime::{DefaultAllocator, InlineDispatcher, IoPriority, LoadFlags, MemoryIo, PakConfig, PakRuntime, PakStatus};
///
/// let io = Arc::new(MemoryIo::new());
/// let runtime = PakRuntime::new(PakConfig::default(), io, Arc::new(InlineDispatcher)).unwrap();
/// let handle = runtime
///     .load("missing.rpak", Arc::new(DefaultAllocator), IoPriority::Normal, LoadFlags::NONE)
///     .unwrap();
/// assert_eq!(runtime.wait(handle), PakStatus::Error);
/// ```
pub struct PakRuntime {
    config: PakConfig,
    paths: PakPaths,
    io: Arc<dyn AsyncIo>,
    jobs: Arc<dyn JobDispatcher>,
    limiter: Arc<JobLimiter>,
    bindings: TypeBindings,
    registry: AssetRegistry,
    install: InstallProgress,
    slots: RwLock<Vec<Option<Arc<PakSlot>>>>,
}

impl PakRuntime {
    pub fn new(config: PakConfig, io: Arc<dyn AsyncIo>, jobs: Arc<dyn JobDispatcher>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            paths: config.paths(),
            io,
            jobs,
            limiter: Arc::new(JobLimiter::new(config.max_outstanding_jobs)),
            bindings: TypeBindings::new(),
            registry: AssetRegistry::new(config.registry_capacity),
            install: InstallProgress::new(1.0),
            slots: RwLock::new(Vec::new()),
            config,
        })
    }

    /// A runtime reading files on `config.io_threads` worker threads and
    /// running asset jobs on a rayon pool of `job_threads` (0 picks the
    /// number of CPUs).
    pub fn threaded(config: PakConfig, job_threads: usize) -> Result<Self, ConfigError> {
        let io = ThreadedFileIo::new(config.io_threads).map_err(|err| ConfigError::Startup {
            what: "I/O threads",
            message: err.to_string(),
        })?;
        let jobs = RayonDispatcher::new(job_threads).map_err(|err| ConfigError::Startup {
            what: "job pool",
            message: err.to_string(),
        })?;
        Self::new(config, Arc::new(io), Arc::new(jobs))
    }

    /// Start with only `fraction` of the install on disk, so optional
    /// streaming stays off until [`InstallProgress::set`] reaches 1.0.
    pub fn with_install_progress(mut self, fraction: f32) -> Self {
        self.install = InstallProgress::new(fraction);
        self
    }

    pub fn config(&self) -> &PakConfig {
        &self.config
    }

    pub fn paths(&self) -> &PakPaths {
        &self.paths
    }

    pub fn bindings(&self) -> &TypeBindings {
        &self.bindings
    }

    pub fn register_binding(&self, binding: AssetBinding) -> Result<(), BindingError> {
        self.bindings.register(binding)
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    /// Install progress gating the optional streaming sets. Starts complete.
    pub fn install_progress(&self) -> &InstallProgress {
        &self.install
    }

    /// Asset jobs currently queued or running, over all containers.
    pub fn outstanding_jobs(&self) -> usize {
        self.limiter.outstanding()
    }

    /// Queue `name` for loading. `None` when the container table is full.
    pub fn load(
        &self,
        name: &str,
        allocator: Arc<dyn PageAllocator>,
        priority: IoPriority,
        flags: LoadFlags,
    ) -> Option<PakHandle> {
        let mut slots = self.slots.write();
        let reusable = slots
            .iter()
            .position(|slot| slot.as_ref().map_or(true, |slot| slot.signals.status() == PakStatus::Freed));
        let index = match reusable {
            Some(index) => index,
            None if slots.len() < self.config.max_loaded_paks => {
                slots.push(None);
                slots.len() - 1
            }
            None => {
                warn!("load: {name} rejected, all {} container slots in use", slots.len());
                return None;
            }
        };

        let generation = slots[index]
            .as_ref()
            .map_or(1, |slot| slot.handle.generation().wrapping_add(1).max(1));
        let handle = PakHandle::new(index as u16, generation);
        let signals = Arc::new(PakSignals::default());
        let pak = LoadedPak::new(handle, name.to_string(), Arc::clone(&signals), allocator, priority, flags);
        slots[index] = Some(Arc::new(PakSlot {
            handle,
            signals,
            pak: Mutex::new(pak),
        }));
        debug!("load: {name} queued as {handle}");
        Some(handle)
    }

    /// Unload a container.
    ///
    /// A loaded container with dependents moves to `UnloadPending` and is
    /// freed once they are gone. A container still loading is canceled at
    /// the next page boundary. Failed containers release their resources.
    pub fn unload(&self, handle: PakHandle) {
        let Some(slot) = self.slot(handle) else {
            return;
        };
        let mut pak = slot.pak.lock();
        match pak.status() {
            PakStatus::Loaded => {
                pak.set_status(PakStatus::UnloadPending);
                let dependents = slot.signals.dependents();
                if dependents == 0 {
                    self.with_context(|ctx| pak.free(ctx));
                } else {
                    debug!("unload: {} deferred, {dependents} dependents", pak.name());
                }
            }
            status if status.is_loading() || status == PakStatus::Error => {
                pak.request_cancel();
                self.with_context(|ctx| pak.drive(ctx));
            }
            _ => {}
        }
    }

    /// Unload `handle` and queue the same container again with its
    /// allocator, priority and flags.
    ///
    /// Blocks until the old load is freed. Returns `None` for an unknown or
    /// freed handle, when dependents hold the old load in `UnloadPending` (the
    /// unload stays requested), or when the container table is full.
    pub fn swap(&self, handle: PakHandle) -> Option<PakHandle> {
        let slot = self.slot(handle).filter(|slot| slot.signals.status() != PakStatus::Freed)?;
        let (name, allocator, priority, flags) = {
            let pak = slot.pak.lock();
            (pak.name().to_string(), pak.allocator(), pak.priority(), pak.flags())
        };
        debug!("swap: {name} ({handle})");

        self.unload(handle);
        loop {
            let progressed = self.drive_slot(&slot);
            match slot.signals.status() {
                PakStatus::Freed => break,
                PakStatus::UnloadPending if slot.signals.dependents() > 0 => {
                    warn!(
                        "swap: {name} still has {} dependents, not reloading",
                        slot.signals.dependents()
                    );
                    return None;
                }
                _ if !progressed => thread::sleep(WAIT_INTERVAL),
                _ => {}
            }
        }
        self.load(&name, allocator, priority, flags)
    }

    pub fn status(&self, handle: PakHandle) -> PakStatus {
        self.slot(handle)
            .map_or(PakStatus::InvalidHandle, |slot| slot.signals.status())
    }

    /// Advance one container as far as it goes without blocking.
    pub fn drive(&self, handle: PakHandle) -> PakStatus {
        match self.slot(handle) {
            Some(slot) => {
                self.drive_slot(&slot);
                slot.signals.status()
            }
            None => PakStatus::InvalidHandle,
        }
    }

    /// Drive every container once. Returns how many are still loading or
    /// canceling.
    pub fn tick(&self) -> usize {
        let slots: Vec<Arc<PakSlot>> = self.slots.read().iter().flatten().cloned().collect();
        let mut busy = 0;
        for slot in slots {
            if needs_driving(slot.signals.status()) {
                self.drive_slot(&slot);
                let status = slot.signals.status();
                if status.is_loading() || status == PakStatus::Canceling {
                    busy += 1;
                }
            }
        }
        busy
    }

    /// Drive `handle` until it settles.
    pub fn wait(&self, handle: PakHandle) -> PakStatus {
        loop {
            let Some(slot) = self.slot(handle) else {
                return PakStatus::InvalidHandle;
            };
            let progressed = self.drive_slot(&slot);
            let status = slot.signals.status();
            if status.is_settled() {
                return status;
            }
            if !progressed {
                thread::sleep(WAIT_INTERVAL);
            }
        }
    }

    /// Why the container failed, if it did.
    pub fn error(&self, handle: PakHandle) -> Option<LoadError> {
        self.slot(handle)?.pak.lock().error().cloned()
    }

    pub fn info(&self, handle: PakHandle) -> Option<PakInfo> {
        let slot = self.slot(handle)?;
        Some(self.describe(&slot))
    }

    /// Every container that is not freed, in slot order.
    pub fn loaded_paks(&self) -> Vec<PakInfo> {
        let slots: Vec<Arc<PakSlot>> = self.slots.read().iter().flatten().cloned().collect();
        slots
            .iter()
            .filter(|slot| slot.signals.status() != PakStatus::Freed)
            .map(|slot| self.describe(slot))
            .collect()
    }

    /// Handle of a live container loaded under `name`, ignoring directories
    /// and case.
    pub fn find(&self, name: &str) -> Option<PakHandle> {
        let wanted = unqualified(name);
        let slots: Vec<Arc<PakSlot>> = self.slots.read().iter().flatten().cloned().collect();
        slots.iter().find_map(|slot| {
            if slot.signals.status() == PakStatus::Freed {
                return None;
            }
            let pak = slot.pak.lock();
            unqualified(pak.name()).eq_ignore_ascii_case(wanted).then_some(slot.handle)
        })
    }

    /// Registry entry for `guid`.
    pub fn asset(&self, guid: PakGuid) -> Option<RegistryEntry> {
        self.registry.lookup(guid)
    }

    /// Copy of a published asset's header bytes.
    pub fn asset_header(&self, guid: PakGuid) -> Option<Vec<u8>> {
        let entry = self.registry.lookup(guid)?;
        let slot = self.slot(entry.pak)?;
        let pak = slot.pak.lock();
        let asset = pak.container()?.assets().get(entry.asset_index as usize)?;
        let bytes = pak.arena()?.read(entry.head, asset.header_size as usize).ok()?;
        Some(bytes.to_vec())
    }

    /// Copy `len` bytes at `ptr` out of a container's pages.
    pub fn read_bytes(&self, handle: PakHandle, ptr: PagePtr, len: usize) -> Option<Vec<u8>> {
        let slot = self.slot(handle)?;
        let pak = slot.pak.lock();
        pak.arena()?.read(ptr, len).ok().map(<[u8]>::to_vec)
    }

    pub fn streaming_sets(&self, handle: PakHandle) -> Option<StreamingSets> {
        self.slot(handle)?.pak.lock().streaming().cloned()
    }

    /// Containers currently holding a resolved reference into `handle`.
    pub fn dependents(&self, handle: PakHandle) -> u32 {
        self.slot(handle).map_or(0, |slot| slot.signals.dependents())
    }

    fn slot(&self, handle: PakHandle) -> Option<Arc<PakSlot>> {
        let slots = self.slots.read();
        slots
            .get(handle.slot() as usize)?
            .as_ref()
            .filter(|slot| slot.handle == handle)
            .cloned()
    }

    fn with_context<R>(&self, f: impl FnOnce(&LoadContext<'_>) -> R) -> R {
        let acquire = |handle: PakHandle| self.acquire(handle);
        let release = |handle: PakHandle| self.release(handle);
        let ctx = LoadContext {
            config: &self.config,
            paths: &self.paths,
            io: self.io.as_ref(),
            jobs: self.jobs.as_ref(),
            limiter: &self.limiter,
            bindings: &self.bindings,
            registry: &self.registry,
            install: &self.install,
            acquire: &acquire,
            release: &release,
        };
        f(&ctx)
    }

    fn drive_slot(&self, slot: &PakSlot) -> bool {
        let mut pak = slot.pak.lock();
        match pak.status() {
            PakStatus::UnloadPending if slot.signals.dependents() == 0 => {
                self.with_context(|ctx| pak.free(ctx));
                true
            }
            status if needs_driving(status) => self.with_context(|ctx| pak.drive(ctx)),
            _ => false,
        }
    }

    /// Count a new dependent of `handle`. Refused once it is going away.
    fn acquire(&self, handle: PakHandle) -> bool {
        let Some(slot) = self.slot(handle) else {
            return false;
        };
        slot.signals.dependents.fetch_add(1, Ordering::SeqCst);
        match slot.signals.status() {
            PakStatus::UnloadPending | PakStatus::Canceling | PakStatus::Freed | PakStatus::Error => {
                release_dependent(&slot.signals);
                false
            }
            _ => true,
        }
    }

    fn release(&self, handle: PakHandle) {
        if let Some(slot) = self.slot(handle) {
            release_dependent(&slot.signals);
        }
    }

    fn describe(&self, slot: &PakSlot) -> PakInfo {
        let pak = slot.pak.lock();
        let container = pak.container();
        PakInfo {
            handle: slot.handle,
            name: pak.name().to_string(),
            status: pak.status(),
            path: pak.path().map(PathBuf::from),
            compression: pak.compression(),
            patched: pak.header().is_some_and(|header| header.is_patched()),
            asset_count: container.map_or(0, |container| container.assets().len()),
            page_count: container.map_or(0, |container| container.page_count()),
            page_bytes: container.map_or(0, |container| container.page_data_size()),
            dependents: slot.signals.dependents(),
            streaming_files: pak.streaming().map_or(0, StreamingSets::file_count),
            error: pak.error().map(ToString::to_string),
        }
    }
}

fn needs_driving(status: PakStatus) -> bool {
    status.is_loading() || matches!(status, PakStatus::Canceling | PakStatus::UnloadPending)
}

fn release_dependent(signals: &PakSignals) {
    let _ = signals
        .dependents
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
}
