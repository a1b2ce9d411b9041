mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use parking_lot::Mutex;
use rpak_common::PakGuid;
use rpak_format::PagePtr;
use rpak_runtime::{
    AssetBinding, AssetContext, AssetLoader, LoaderError, MemoryIo, PakConfig, PakRuntime, PakStatus,
    RayonDispatcher, ResolvedRef,
};

fn pooled(io: &Arc<MemoryIo>, config: PakConfig) -> PakRuntime {
    let jobs = RayonDispatcher::new(4).unwrap();
    PakRuntime::new(config, io.clone(), Arc::new(jobs)).unwrap()
}

/// Tracks how many of its jobs run at once.
#[derive(Default)]
struct GaugeLoader {
    running: AtomicUsize,
    peak: AtomicUsize,
    loaded: Mutex<Vec<PakGuid>>,
}

impl AssetLoader for GaugeLoader {
    fn load(&self, asset: &AssetContext) -> Result<(), LoaderError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        self.loaded.lock().push(asset.guid);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_jobs_on_pool() {
    let io = Arc::new(MemoryIo::new());
    io.insert(platform("ui.rpak"), basic_pak(0x100, 8).build());
    let runtime = pooled(&io, config());
    let loader = Arc::new(RecordingLoader::delayed(Duration::from_millis(3)));
    bind(&runtime, Arc::clone(&loader));

    let handle = load(&runtime, "ui.rpak");
    assert_eq!(runtime.wait(handle), PakStatus::Loaded);

    let mut loaded = loader.loaded.lock().clone();
    loaded.sort();
    assert_eq!(loaded, (0x100..0x108).map(PakGuid).collect::<Vec<_>>());
    assert_eq!(runtime.outstanding_jobs(), 0);
    assert_eq!(runtime.registry().len(), 8);
}

#[test]
fn test_global_job_limit() {
    let io = Arc::new(MemoryIo::new());
    io.insert(platform("a.rpak"), basic_pak(0x100, 12).build());
    io.insert(platform("b.rpak"), basic_pak(0x200, 12).build());
    let runtime = pooled(
        &io,
        PakConfig {
            max_outstanding_jobs: 2,
            ..config()
        },
    );
    let loader = Arc::new(GaugeLoader::default());
    runtime
        .register_binding(AssetBinding::new(txtr(), 1, "texture", HEADER_SIZE as u32).loader(loader.clone()))
        .unwrap();

    let a = load(&runtime, "a.rpak");
    let b = load(&runtime, "b.rpak");
    let mut ticks = 0;
    while runtime.tick() > 0 {
        ticks += 1;
        assert!(ticks < 1_000_000, "containers never settled");
        thread::yield_now();
    }

    assert_eq!(runtime.status(a), PakStatus::Loaded);
    assert_eq!(runtime.status(b), PakStatus::Loaded);
    assert_eq!(loader.loaded.lock().len(), 24);
    assert!(loader.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(runtime.outstanding_jobs(), 0);
}

#[test]
fn test_shared_dependency_across_threads() {
    let io = Arc::new(MemoryIo::with_latency(1));
    io.insert(platform("common.rpak"), basic_pak(0x100, 2).build());
    io.insert(platform("left.rpak"), dependent_pak(0x200, 0x100).build());
    io.insert(platform("right.rpak"), dependent_pak(0x300, 0x100).build());
    let runtime = pooled(&io, config());

    let common = load(&runtime, "common.rpak");
    assert_eq!(runtime.wait(common), PakStatus::Loaded);

    let handles: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = ["left.rpak", "right.rpak"]
            .into_iter()
            .map(|name| {
                let runtime = &runtime;
                scope.spawn(move || {
                    let handle = load(runtime, name);
                    assert_eq!(runtime.wait(handle), PakStatus::Loaded);
                    handle
                })
            })
            .collect();
        workers.into_iter().map(|worker| worker.join().unwrap()).collect()
    });

    let expected = ResolvedRef::new(common.slot(), PagePtr::new(0, 0)).encode().to_le_bytes();
    for handle in &handles {
        assert_eq!(runtime.read_bytes(*handle, PagePtr::new(0, 8), 8).unwrap(), expected);
    }
    assert_eq!(runtime.dependents(common), 2);

    runtime.unload(common);
    assert_eq!(runtime.status(common), PakStatus::UnloadPending);
    for handle in handles {
        runtime.unload(handle);
        assert_eq!(runtime.status(handle), PakStatus::Freed);
    }
    runtime.tick();
    assert_eq!(runtime.status(common), PakStatus::Freed);
    assert!(runtime.registry().is_empty());
}

#[test]
fn test_parallel_independent_loads() {
    let io = Arc::new(MemoryIo::with_latency(1));
    let names: Vec<String> = (0..6).map(|index| format!("pak{index}.rpak")).collect();
    for (index, name) in names.iter().enumerate() {
        io.insert(platform(name), basic_pak(0x1000 * (index as u64 + 1), 3).build());
    }
    let runtime = pooled(&io, config());

    thread::scope(|scope| {
        for name in &names {
            let runtime = &runtime;
            scope.spawn(move || {
                let handle = load(runtime, name);
                assert_eq!(runtime.wait(handle), PakStatus::Loaded);
            });
        }
    });

    assert_eq!(runtime.registry().len(), 18);
    assert_eq!(runtime.loaded_paks().len(), 6);
    assert_eq!(io.open_files(), 0);
}
