//! Per-container load state machine.
//!
//! A [`LoadedPak`] is advanced by [`LoadedPak::drive`], which runs the step
//! for the current [`PakStatus`] until it has to wait for I/O or jobs. Each
//! step is re-entrant: calling it again after it returned picks up where it
//! stopped.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, trace};
use rpak_common::FourCc;
use rpak_format::{Compression, ContainerLayout, FormatError, PagePtr, PakContainer, PakHeader, PatchInfo};

use crate::alloc::PageAllocator;
use crate::bindings::{AssetContext, TypeBindings};
use crate::chain::PatchChain;
use crate::config::{PakConfig, PakPaths};
use crate::error::LoadError;
use crate::io::{AsyncIo, IoPriority};
use crate::jobs::{submit_tracked, JobDispatcher, JobLimiter, JobTracker};
use crate::pages::PageArena;
use crate::reader::ContainerStream;
use crate::registry::{AssetRegistry, RegistryEntry};
use crate::resolve::Resolver;
use crate::streaming::{InstallProgress, StreamingRequest, StreamingSets};
use crate::{FxHashSet, LoadFlags, PakHandle, PakStatus};

/// Upper bound on state steps per [`LoadedPak::drive`] call.
const MAX_STEPS: usize = 64;

/// Everything a load step may touch outside its own container.
pub(crate) struct LoadContext<'a> {
    pub config: &'a PakConfig,
    pub paths: &'a PakPaths,
    pub io: &'a dyn AsyncIo,
    pub jobs: &'a dyn JobDispatcher,
    pub limiter: &'a Arc<JobLimiter>,
    pub bindings: &'a TypeBindings,
    pub registry: &'a AssetRegistry,
    pub install: &'a InstallProgress,
    /// Take a dependent reference on another container.
    pub acquire: &'a dyn Fn(PakHandle) -> bool,
    /// Drop a reference taken with `acquire`.
    pub release: &'a dyn Fn(PakHandle),
}

/// State shared with other threads without taking the container lock.
#[derive(Debug, Default)]
pub(crate) struct PakSignals {
    pub status: AtomicU8,
    /// Containers that resolved a dependency into this one.
    pub dependents: AtomicU32,
    pub cancel: AtomicBool,
}

impl PakSignals {
    pub(crate) fn status(&self) -> PakStatus {
        PakStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn dependents(&self) -> u32 {
        self.dependents.load(Ordering::SeqCst)
    }
}

/// Where decoded bytes go: the table region first, then each page in order.
#[derive(Debug, Default)]
pub(crate) struct Destination {
    meta: Vec<u8>,
    meta_filled: usize,
    arena: Option<PageArena>,
    page: usize,
    page_filled: usize,
    /// A page that was just completed and still awaits its hooks.
    boundary: Option<usize>,
}

impl Destination {
    fn begin(&mut self, header: &[u8], len: usize) {
        self.meta = header.to_vec();
        self.meta.resize(len.max(header.len()), 0);
        self.meta_filled = header.len();
    }

    fn extend_meta(&mut self, len: usize) {
        if len > self.meta.len() {
            self.meta.resize(len, 0);
        }
    }

    fn meta_complete(&self) -> bool {
        self.meta_filled == self.meta.len()
    }

    fn install(&mut self, arena: PageArena) {
        self.arena = Some(arena);
        self.page = 0;
        self.page_filled = 0;
    }

    /// Free space the next bytes go to. Empty while a completed page
    /// awaits its hooks or before pages exist.
    pub(crate) fn window(&mut self) -> &mut [u8] {
        if self.boundary.is_some() {
            return &mut [];
        }
        if self.meta_filled < self.meta.len() {
            return &mut self.meta[self.meta_filled..];
        }
        let page_filled = self.page_filled;
        match self.arena.as_mut().and_then(|arena| arena.page_mut(self.page)) {
            Some(page) => &mut page[page_filled..],
            None => &mut [],
        }
    }

    pub(crate) fn advance(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if self.meta_filled < self.meta.len() {
            self.meta_filled += count;
            return;
        }
        self.page_filled += count;
        self.settle();
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let window = self.window();
        let count = window.len().min(bytes.len());
        window[..count].copy_from_slice(&bytes[..count]);
        self.advance(count);
        count
    }

    /// Mark the current page complete once it is full; empty pages complete
    /// as soon as they become current.
    fn settle(&mut self) {
        if self.boundary.is_some() {
            return;
        }
        let Some(arena) = self.arena.as_ref() else {
            return;
        };
        if let Some(page) = arena.page(self.page) {
            if self.page_filled == page.len() {
                self.boundary = Some(self.page);
                self.page += 1;
                self.page_filled = 0;
            }
        }
    }

    fn take_boundary(&mut self) -> Option<usize> {
        self.settle();
        self.boundary.take()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.meta_complete()
            && self.boundary.is_none()
            && self.arena.as_ref().is_some_and(|arena| self.page >= arena.len())
    }

    /// Some region still has room for decoded bytes.
    fn wants_bytes(&self) -> bool {
        !self.meta_complete() || self.arena.as_ref().is_some_and(|arena| self.page < arena.len())
    }

    /// Decoded bytes placed so far.
    fn written(&self) -> u64 {
        let pages = self.arena.as_ref().map_or(0, |arena| {
            (0..self.page.min(arena.len()))
                .filter_map(|index| arena.page(index))
                .map(|page| page.len() as u64)
                .sum()
        });
        (self.meta_filled + self.page_filled) as u64 + pages
    }

    fn at_page_boundary(&self) -> bool {
        self.page_filled == 0
    }

    fn arena(&self) -> Option<&PageArena> {
        self.arena.as_ref()
    }
}

pub(crate) struct LoadedPak {
    handle: PakHandle,
    name: String,
    signals: Arc<PakSignals>,
    allocator: Arc<dyn PageAllocator>,
    priority: IoPriority,
    flags: LoadFlags,
    status: PakStatus,
    error: Option<LoadError>,
    started: Instant,
    path: Option<PathBuf>,

    main: Option<ContainerStream>,
    header: Option<PakHeader>,
    dest: Destination,
    patch: Option<PatchChain>,
    container: Option<PakContainer>,
    streaming: Option<StreamingSets>,
    remaining: Vec<u16>,
    next_dispatch: usize,
    jobs: Arc<JobTracker>,
    acquired: Vec<PakHandle>,
    published: bool,
}

impl LoadedPak {
    pub(crate) fn new(
        handle: PakHandle,
        name: String,
        signals: Arc<PakSignals>,
        allocator: Arc<dyn PageAllocator>,
        priority: IoPriority,
        flags: LoadFlags,
    ) -> Self {
        signals.status.store(PakStatus::Pending as u8, Ordering::SeqCst);
        Self {
            handle,
            name,
            signals,
            allocator,
            priority,
            flags,
            status: PakStatus::Pending,
            error: None,
            started: Instant::now(),
            path: None,
            main: None,
            header: None,
            dest: Destination::default(),
            patch: None,
            container: None,
            streaming: None,
            remaining: Vec::new(),
            next_dispatch: 0,
            jobs: Arc::new(JobTracker::default()),
            acquired: Vec::new(),
            published: false,
        }
    }

    pub(crate) fn status(&self) -> PakStatus {
        self.status
    }

    pub(crate) fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn allocator(&self) -> Arc<dyn PageAllocator> {
        Arc::clone(&self.allocator)
    }

    pub(crate) fn priority(&self) -> IoPriority {
        self.priority
    }

    pub(crate) fn flags(&self) -> LoadFlags {
        self.flags
    }

    pub(crate) fn container(&self) -> Option<&PakContainer> {
        self.container.as_ref()
    }

    pub(crate) fn arena(&self) -> Option<&PageArena> {
        self.dest.arena()
    }

    pub(crate) fn streaming(&self) -> Option<&StreamingSets> {
        self.streaming.as_ref()
    }

    pub(crate) fn header(&self) -> Option<&PakHeader> {
        self.header.as_ref()
    }

    pub(crate) fn compression(&self) -> Option<Compression> {
        self.header.as_ref().map(PakHeader::compression)
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn set_status(&mut self, status: PakStatus) {
        if status != self.status {
            trace!("load: {} {} -> {}", self.name, self.status, status);
        }
        self.status = status;
        self.signals.status.store(status as u8, Ordering::SeqCst);
    }

    fn cancel_requested(&self) -> bool {
        self.signals.cancel.load(Ordering::SeqCst)
    }

    fn fail(&mut self, err: LoadError) {
        error!("load: {} failed in {}: {err}", self.name, self.status);
        self.error = Some(err);
        self.set_status(PakStatus::Error);
    }

    /// Advance until blocked or settled. Returns whether anything happened.
    pub(crate) fn drive(&mut self, ctx: &LoadContext<'_>) -> bool {
        let mut progressed = false;
        for _ in 0..MAX_STEPS {
            let before = self.status;
            match self.step(ctx) {
                Ok(true) => progressed = true,
                Ok(false) if self.status == before => break,
                Ok(false) => progressed = true,
                Err(err) => {
                    self.fail(err);
                    return true;
                }
            }
            if self.status.is_settled() {
                break;
            }
        }
        progressed
    }

    fn step(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        if self.status.is_loading() && self.cancel_requested() && self.at_cancel_point() {
            debug!("load: {} canceled in {}", self.name, self.status);
            self.set_status(PakStatus::Canceling);
            return Ok(true);
        }

        match self.status {
            PakStatus::Pending => {
                info!("load: {} started", self.name);
                self.set_status(PakStatus::Starting);
                Ok(true)
            }
            PakStatus::Starting => self.start(ctx),
            PakStatus::ReadingHeader => self.read_header(ctx),
            PakStatus::ApplyingPatchChain | PakStatus::CopyingPages => self.copy(ctx),
            PakStatus::DispatchingAssetJobs => self.dispatch_jobs(ctx),
            PakStatus::ResolvingDependencies => self.resolve_dependencies(ctx),
            PakStatus::Canceling => Ok(self.cancel_step(ctx)),
            PakStatus::Loaded
            | PakStatus::Error
            | PakStatus::UnloadPending
            | PakStatus::Freed
            | PakStatus::InvalidHandle => Ok(false),
        }
    }

    /// Cancellation takes effect between pages, never halfway through one.
    fn at_cancel_point(&self) -> bool {
        match self.status {
            PakStatus::ApplyingPatchChain | PakStatus::CopyingPages => self.dest.at_page_boundary(),
            _ => true,
        }
    }

    fn start(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        let stream = ContainerStream::open(
            ctx.io,
            ctx.paths,
            &self.name,
            self.priority,
            ctx.config.read_chunk_size,
            ctx.config.max_reads_in_flight,
        )?;
        debug!("load: {} opened {}", self.name, stream.path().display());
        self.path = Some(stream.path().to_path_buf());
        self.main = Some(stream);
        self.set_status(PakStatus::ReadingHeader);
        Ok(true)
    }

    fn read_header(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        let Some(main) = self.main.as_mut() else {
            return Ok(false);
        };

        let Some(header) = self.header else {
            let Some(header) = main.poll_header(ctx.io)? else {
                return Ok(false);
            };
            header.validate(&ctx.config.limits())?;
            if header.has_companion_module() {
                debug!("load: {} declares a companion module, ignored", self.name);
            }
            main.start_body(&header, &ctx.config.decoder())?;

            let layout = ContainerLayout::new(&header);
            let target = if header.is_patched() {
                layout.patch_area.end
            } else {
                layout.total_header_size
            };
            self.dest.begin(main.header_bytes(), target);
            trace!(
                "load: {} header: {} pages, {} assets, {} patches, {}",
                self.name,
                header.page_count,
                header.asset_count,
                header.patch_index,
                header.compression().name()
            );
            self.header = Some(header);
            return Ok(true);
        };

        let mut progress = self.fill_from_main(ctx)?;
        if !self.dest.meta_complete() {
            return Ok(progress);
        }

        if !header.is_patched() {
            self.tables_ready(ctx)?;
            self.set_status(PakStatus::CopyingPages);
            return Ok(true);
        }

        if self.patch.is_none() {
            let info = PatchInfo::parse(&self.dest.meta, &header)?;
            let expected = info.expected_stream_size(&header);
            if expected != header.decompressed_size {
                return Err(FormatError::SizeMismatch {
                    what: "patch container size",
                    expected,
                    actual: header.decompressed_size,
                }
                .into());
            }
            debug!("load: {} is patched by {} chain files", self.name, info.files.len());
            self.patch = Some(PatchChain::new(info));
            progress = true;
        }

        let (Some(main), Some(chain)) = (self.main.as_mut(), self.patch.as_mut()) else {
            return Ok(progress);
        };
        loop {
            let output = main.output();
            let available = output.len();
            if available > 0 {
                let taken = chain.collect_edit_stream(output);
                main.consume_output(taken);
                progress |= taken > 0;
                if taken < available {
                    break;
                }
                continue;
            }
            if main.is_drained() || !main.pump(ctx.io)? {
                break;
            }
            progress = true;
        }

        if !chain.has_edit_stream() || !main.is_drained() {
            return Ok(progress);
        }
        if !main.drain(ctx.io) {
            return Ok(progress);
        }
        main.close(ctx.io);
        chain.start()?;
        self.main = None;
        self.dest.extend_meta(ContainerLayout::new(&header).total_header_size);
        self.set_status(PakStatus::ApplyingPatchChain);
        Ok(true)
    }

    /// Move decoded bytes from the container body into the destination.
    fn fill_from_main(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        let Some(main) = self.main.as_mut() else {
            return Ok(false);
        };
        let mut progress = false;
        loop {
            let output = main.output();
            if output.is_empty() {
                if !main.pump(ctx.io)? {
                    if main.is_drained() && self.dest.wants_bytes() {
                        return Err(self.body_size_mismatch());
                    }
                    break;
                }
                progress = true;
                continue;
            }
            let written = self.dest.write(output);
            if written == 0 {
                break;
            }
            main.consume_output(written);
            progress = true;
        }
        Ok(progress)
    }

    /// The decoded body ended short of, or ran past, what the tables describe.
    fn body_size_mismatch(&self) -> LoadError {
        FormatError::SizeMismatch {
            what: "container body",
            expected: self.header.map_or(0, |header| header.decompressed_size),
            actual: self.dest.written(),
        }
        .into()
    }

    /// The table region is in memory: parse it, bind types, allocate pages
    /// and open the streaming sets.
    fn tables_ready(&mut self, ctx: &LoadContext<'_>) -> Result<(), LoadError> {
        let container = PakContainer::parse(&self.dest.meta, &ctx.config.limits())?;
        let header = container.header();
        if !header.is_patched() {
            let described = container.total_header_size() as u64 + container.page_data_size();
            if described != header.decompressed_size {
                return Err(FormatError::SizeMismatch {
                    what: "container tables and pages",
                    expected: described,
                    actual: header.decompressed_size,
                }
                .into());
            }
        }

        let mut seen = FxHashSet::<FourCc>::default();
        for asset in container.assets() {
            let alignment = container
                .pages()
                .get(asset.head.index as usize)
                .map_or(8, |page| page.alignment.max(1));
            let binding = ctx.bindings.ensure(asset.tag, asset.version, asset.header_size, alignment)?;
            if seen.insert(asset.tag) && !binding.is_stub() && binding.version != asset.version {
                debug!(
                    "load: {} has {} assets at v{}, binding expects v{}",
                    self.name, asset.tag, asset.version, binding.version
                );
            }
        }

        let arena = PageArena::allocate(&container, self.allocator.as_ref());

        let skip_all = self.flags.contains(LoadFlags::SKIP_STREAMING);
        let open_optional = !skip_all
            && !self.flags.contains(LoadFlags::SKIP_OPTIONAL_STREAMING)
            && !ctx.config.disable_optional_streaming
            && ctx.install.is_complete();
        let streaming = StreamingSets::open(&StreamingRequest {
            io: ctx.io,
            paths: ctx.paths,
            container_name: &self.name,
            container: &container,
            priority: self.priority,
            open_mandatory: !skip_all,
            open_optional,
        })?;

        trace!(
            "load: {} tables ready, {} bytes of pages",
            self.name,
            container.page_data_size()
        );
        self.remaining = container.assets().iter().map(|asset| asset.remaining_dependencies).collect();
        self.dest.install(arena);
        self.container = Some(container);
        self.streaming = Some(streaming);
        Ok(())
    }

    /// Copy pages, through the patch chain when there is one.
    fn copy(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        let mut progress = false;
        loop {
            if let Some(page) = self.dest.take_boundary() {
                self.page_completed(ctx, page)?;
                progress = true;
                if self.cancel_requested() {
                    return Ok(true);
                }
                continue;
            }

            if self.container.is_none() && self.dest.meta_complete() {
                self.tables_ready(ctx)?;
                self.set_status(PakStatus::CopyingPages);
                progress = true;
                continue;
            }

            if self.dest.is_complete() {
                return Ok(self.finish_copy(ctx)? || progress);
            }

            let moved = if self.patch.is_some() {
                self.advance_chain(ctx)?
            } else {
                self.fill_from_main(ctx)?
            };
            if !moved {
                return Ok(progress);
            }
            progress = true;
        }
    }

    fn advance_chain(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        let Some(chain) = self.patch.as_mut() else {
            return Ok(false);
        };
        if let Some(err) = chain.incomplete_destination() {
            return Err(err.into());
        }
        chain.advance(ctx, &mut self.dest, &self.name, self.priority)
    }

    /// Every page is copied: wait for the body or chain to end cleanly and
    /// for its reads to drain.
    fn finish_copy(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        let mut progress = false;
        if let Some(chain) = self.patch.as_mut() {
            if !chain.is_finished() {
                progress = chain.advance(ctx, &mut self.dest, &self.name, self.priority)?;
                if !chain.is_finished() {
                    return Ok(progress);
                }
            }
            if !chain.drain(ctx) {
                return Ok(progress);
            }
            chain.close(ctx);
        }

        if let Some(main) = self.main.as_ref() {
            if !main.output().is_empty() {
                return Err(self.body_size_mismatch());
            }
        }
        if let Some(main) = self.main.as_mut() {
            if !main.is_drained() {
                progress |= main.pump(ctx.io)?;
                if !main.output().is_empty() {
                    return Err(self.body_size_mismatch());
                }
                if !main.is_drained() {
                    return Ok(progress);
                }
            }
            if !main.drain(ctx.io) {
                return Ok(progress);
            }
            main.close(ctx.io);
            self.main = None;
        }

        trace!("load: {} pages copied", self.name);
        self.set_status(PakStatus::DispatchingAssetJobs);
        Ok(true)
    }

    /// Hooks for a freshly copied page: pointer checks and asset dispatch.
    fn page_completed(&mut self, ctx: &LoadContext<'_>, page: usize) -> Result<(), LoadError> {
        let (Some(container), Some(arena)) = (self.container.as_ref(), self.dest.arena()) else {
            return Ok(());
        };

        for slot in container.pointers().iter().filter(|ptr| ptr.index as usize == page) {
            container.check_page_pointer(*slot, 8)?;
            let raw = arena.read_u64(*slot)?;
            let target = PagePtr::new(raw as u32, (raw >> 32) as u32);
            container.check_page_pointer(target, 0)?;
        }

        trace!("load: {} page {page} copied", self.name);
        if container.page_kind(page).is_some_and(|kind| kind.triggers_dispatch()) {
            self.dispatch_ready(ctx, page + 1)?;
        }
        Ok(())
    }

    /// Hand assets whose head pages are all copied to the job dispatcher, in
    /// table order, while the global job limit allows.
    fn dispatch_ready(&mut self, ctx: &LoadContext<'_>, copied_pages: usize) -> Result<(), LoadError> {
        let (Some(container), Some(arena)) = (self.container.as_ref(), self.dest.arena()) else {
            return Ok(());
        };

        while let Some(asset) = container.assets().get(self.next_dispatch) {
            if usize::from(asset.page_end) > copied_pages {
                break;
            }

            let loader = ctx.bindings.get(asset.tag).and_then(|binding| binding.loader);
            if let Some(loader) = loader {
                let header = arena.read(asset.head, asset.header_size as usize)?.to_vec();
                if !ctx.limiter.try_acquire() {
                    trace!("load: {} waiting for job slots at asset {}", self.name, self.next_dispatch);
                    break;
                }
                let context = AssetContext {
                    pak: self.handle,
                    index: self.next_dispatch as u32,
                    guid: asset.guid,
                    tag: asset.tag,
                    version: asset.version,
                    header,
                    data: asset.has_data().then_some(asset.data),
                    stream_offset: asset.stream_offset,
                    opt_stream_offset: asset.opt_stream_offset,
                };
                submit_tracked(ctx.jobs, &self.jobs, ctx.limiter, move || loader.load(&context));
            }
            self.next_dispatch += 1;
        }
        Ok(())
    }

    fn dispatch_jobs(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        let before = self.next_dispatch;
        self.dispatch_ready(ctx, usize::MAX)?;

        if let Some(failure) = self.jobs.first_failure() {
            return Err(failure.into());
        }
        let asset_count = self.container.as_ref().map_or(0, |container| container.assets().len());
        if self.next_dispatch < asset_count || self.jobs.outstanding() > 0 {
            return Ok(self.next_dispatch != before);
        }

        self.set_status(PakStatus::ResolvingDependencies);
        Ok(true)
    }

    fn resolve_dependencies(&mut self, ctx: &LoadContext<'_>) -> Result<bool, LoadError> {
        let (Some(container), Some(arena)) = (self.container.as_ref(), self.dest.arena.as_mut()) else {
            return Ok(false);
        };

        let resolver = Resolver::new(ctx.registry, container, self.handle, ctx.acquire);
        let mut resolved = 0;
        for (index, remaining) in self.remaining.iter_mut().enumerate() {
            resolved += resolver.resolve_asset(index, remaining, arena, &mut self.acquired)?;
        }

        let entries: Vec<RegistryEntry> = container
            .assets()
            .iter()
            .enumerate()
            .map(|(index, asset)| RegistryEntry {
                guid: asset.guid,
                pak: self.handle,
                asset_index: index as u32,
                head: asset.head,
            })
            .collect();
        ctx.registry.publish(&entries)?;
        self.published = true;

        info!(
            "load: {} loaded as {}: {} assets, {} pages, {resolved} dependencies in {:.1?}",
            self.name,
            self.handle,
            entries.len(),
            container.page_count(),
            self.started.elapsed()
        );
        self.set_status(PakStatus::Loaded);
        Ok(true)
    }

    /// Drain reads and jobs, then free. True once freed.
    fn cancel_step(&mut self, ctx: &LoadContext<'_>) -> bool {
        let mut idle = true;
        if let Some(main) = self.main.as_mut() {
            idle &= main.drain(ctx.io);
        }
        if let Some(chain) = self.patch.as_mut() {
            idle &= chain.drain(ctx);
        }
        if self.jobs.outstanding() > 0 || !idle {
            return false;
        }
        self.free(ctx);
        true
    }

    /// Begin tearing down a container that is still loading or failed.
    pub(crate) fn request_cancel(&mut self) {
        self.signals.cancel.store(true, Ordering::SeqCst);
        if self.status == PakStatus::Error {
            self.set_status(PakStatus::Canceling);
        }
    }

    /// Release everything the container holds.
    pub(crate) fn free(&mut self, ctx: &LoadContext<'_>) {
        if let Some(container) = self.container.as_ref() {
            if self.published {
                let removed = ctx
                    .registry
                    .remove(self.handle, container.assets().iter().map(|asset| asset.guid));
                trace!("load: {} removed {removed} registry entries", self.name);
            }
            for asset in &container.assets()[..self.next_dispatch.min(container.assets().len())] {
                if self.jobs.failed(asset.guid) {
                    continue;
                }
                if let Some(loader) = ctx.bindings.get(asset.tag).and_then(|binding| binding.loader) {
                    loader.unload(self.handle, asset.guid);
                }
            }
        }
        self.published = false;

        if let Some(main) = self.main.take() {
            main.close(ctx.io);
        }
        if let Some(mut chain) = self.patch.take() {
            chain.close(ctx);
        }
        if let Some(mut streaming) = self.streaming.take() {
            streaming.close(ctx.io);
        }
        for handle in self.acquired.drain(..) {
            (ctx.release)(handle);
        }

        self.dest = Destination::default();
        self.container = None;
        self.remaining = Vec::new();
        info!("load: {} freed", self.name);
        self.set_status(PakStatus::Freed);
    }
}
