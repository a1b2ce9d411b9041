#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rpak_common::{FourCc, PakGuid};
use rpak_format::{AssetSpec, PagePtr, PakBuilder, SegmentKind};
use rpak_runtime::{
    AssetBinding, AssetContext, AssetLoader, DefaultAllocator, InlineDispatcher, IoPriority, LoadFlags,
    LoaderError, MemoryIo, PageAllocator, PakConfig, PakHandle, PakRuntime, PakStatus,
};

pub const HEADER_SIZE: usize = 16;

pub fn txtr() -> FourCc {
    FourCc::from_bytes(*b"txtr")
}

/// Small reads and windows so that every load crosses many chunk and
/// window boundaries.
pub fn config() -> PakConfig {
    PakConfig {
        base_dir: PathBuf::from("/game"),
        read_chunk_size: 64,
        max_reads_in_flight: 2,
        input_window: 256,
        output_window: 256,
        window_margin: 16,
        ..PakConfig::default()
    }
}

pub fn platform(name: &str) -> String {
    format!("/game/paks/Win64/{name}")
}

pub fn runtime(io: &Arc<MemoryIo>) -> PakRuntime {
    runtime_with(io, config())
}

pub fn runtime_with(io: &Arc<MemoryIo>, config: PakConfig) -> PakRuntime {
    PakRuntime::new(config, io.clone(), Arc::new(InlineDispatcher)).unwrap()
}

pub fn load(runtime: &PakRuntime, name: &str) -> PakHandle {
    load_with(runtime, name, Arc::new(DefaultAllocator), LoadFlags::NONE)
}

pub fn load_with(
    runtime: &PakRuntime,
    name: &str,
    allocator: Arc<dyn PageAllocator>,
    flags: LoadFlags,
) -> PakHandle {
    runtime.load(name, allocator, IoPriority::Normal, flags).unwrap()
}

/// Drive `handle` until it settles, failing the test if it never does.
pub fn settle(runtime: &PakRuntime, handle: PakHandle) -> PakStatus {
    for _ in 0..100_000 {
        let status = runtime.drive(handle);
        if status.is_settled() {
            return status;
        }
    }
    panic!("{handle} never settled, stuck in {}", runtime.status(handle));
}

/// Header bytes of asset `index` in [`basic_pak`].
pub fn asset_header(index: usize) -> Vec<u8> {
    vec![index as u8 + 1; HEADER_SIZE]
}

/// Bytes of the CPU page in [`basic_pak`].
pub fn cpu_page() -> Vec<u8> {
    (0..200u32).map(|i| (i * 3) as u8).collect()
}

/// `count` assets with consecutive GUIDs from `first_guid`, their headers
/// packed into one head page, followed by a CPU page.
pub fn basic_pak(first_guid: u64, count: usize) -> PakBuilder {
    let mut builder = PakBuilder::new();
    let head = builder.add_segment(SegmentKind::Head, 8);
    let cpu = builder.add_segment(SegmentKind::Cpu, 16);

    let headers: Vec<u8> = (0..count).flat_map(asset_header).collect();
    let head_page = builder.add_page(head, 8, headers);
    builder.add_page(cpu, 16, cpu_page());

    for index in 0..count {
        builder.add_asset(AssetSpec::new(
            PakGuid(first_guid + index as u64),
            txtr(),
            PagePtr::new(head_page, (index * HEADER_SIZE) as u32),
            HEADER_SIZE as u32,
        ));
    }
    builder
}

/// One asset whose 32-byte header holds, at offset 8, a dependency slot
/// naming `target`.
pub fn dependent_pak(guid: u64, target: u64) -> PakBuilder {
    let mut header = vec![0xEEu8; 32];
    header[8..16].copy_from_slice(&target.to_le_bytes());

    let mut builder = PakBuilder::new();
    let head = builder.add_segment(SegmentKind::Head, 8);
    let page = builder.add_page(head, 8, header);
    builder.add_asset(
        AssetSpec::new(PakGuid(guid), txtr(), PagePtr::new(page, 0), 32).dependencies([PagePtr::new(page, 8)]),
    );
    builder
}

/// Records asset callbacks; optionally slow, optionally failing one GUID.
#[derive(Default)]
pub struct RecordingLoader {
    pub loaded: Mutex<Vec<PakGuid>>,
    pub unloaded: Mutex<Vec<PakGuid>>,
    pub fail: Option<PakGuid>,
    pub delay: Duration,
}

impl RecordingLoader {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(guid: PakGuid) -> Self {
        Self {
            fail: Some(guid),
            ..Self::default()
        }
    }
}

impl AssetLoader for RecordingLoader {
    fn load(&self, asset: &AssetContext) -> Result<(), LoaderError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail == Some(asset.guid) {
            return Err(LoaderError::new(asset.guid, asset.tag, "rejected by test loader"));
        }
        self.loaded.lock().push(asset.guid);
        Ok(())
    }

    fn unload(&self, _pak: PakHandle, guid: PakGuid) {
        self.unloaded.lock().push(guid);
    }
}

pub fn bind(runtime: &PakRuntime, loader: Arc<RecordingLoader>) {
    runtime
        .register_binding(AssetBinding::new(txtr(), 1, "texture", HEADER_SIZE as u32).loader(loader))
        .unwrap();
}
