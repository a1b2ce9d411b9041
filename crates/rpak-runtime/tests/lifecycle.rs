mod common;

use std::sync::Arc;

use common::*;
use rpak_common::PakGuid;
use rpak_runtime::{CountingAllocator, DefaultAllocator, IoPriority, LoadFlags, MemoryIo, PakConfig, PakStatus};

#[test]
fn test_cancel_at_page_boundary() {
    let io = Arc::new(MemoryIo::with_latency(2));
    let mut builder = basic_pak(0x100, 4);
    builder.add_page(1, 16, vec![7; 4096]);
    let bytes = builder.build();
    io.insert(platform("ui.rpak"), bytes.clone());
    let runtime = runtime(&io);
    let loader = Arc::new(RecordingLoader::default());
    bind(&runtime, Arc::clone(&loader));

    let handle = load(&runtime, "ui.rpak");
    let mut polls = 0;
    loop {
        let status = runtime.drive(handle);
        if status == PakStatus::CopyingPages || status.is_settled() {
            break;
        }
        polls += 1;
        assert!(polls < 10_000, "never reached page copy");
    }

    assert_eq!(runtime.status(handle), PakStatus::CopyingPages);

    runtime.unload(handle);
    assert_eq!(settle(&runtime, handle), PakStatus::Freed);
    // The load stopped well before the last page was read.
    assert!(io.bytes_delivered() < bytes.len() as u64 - 4096);
    assert!(runtime.registry().is_empty());
    assert_eq!(runtime.outstanding_jobs(), 0);
    assert_eq!(io.open_files(), 0);
    assert_eq!(io.outstanding(), 0);

    let loaded = loader.loaded.lock().clone();
    let unloaded = loader.unloaded.lock().clone();
    assert_eq!(loaded, unloaded);
}

#[test]
fn test_cancel_before_start() {
    let io = Arc::new(MemoryIo::new());
    io.insert(platform("ui.rpak"), basic_pak(0x100, 1).build());
    let runtime = runtime(&io);

    let handle = load(&runtime, "ui.rpak");
    runtime.unload(handle);
    assert_eq!(runtime.status(handle), PakStatus::Freed);
    assert!(io.opened().is_empty());
}

#[test]
fn test_unload_failed_container() {
    let io = Arc::new(MemoryIo::new());
    let runtime = runtime(&io);

    let handle = load(&runtime, "missing.rpak");
    assert_eq!(runtime.wait(handle), PakStatus::Error);
    assert!(runtime.error(handle).is_some());
    assert!(runtime.info(handle).unwrap().error.is_some());

    runtime.unload(handle);
    runtime.tick();
    assert_eq!(runtime.status(handle), PakStatus::Freed);
    assert!(runtime.loaded_paks().is_empty());
}

#[test]
fn test_unload_calls_asset_unload() {
    let io = Arc::new(MemoryIo::new());
    io.insert(platform("ui.rpak"), basic_pak(0x100, 3).build());
    let runtime = runtime(&io);
    let loader = Arc::new(RecordingLoader::default());
    bind(&runtime, Arc::clone(&loader));

    let handle = load(&runtime, "ui.rpak");
    assert_eq!(runtime.wait(handle), PakStatus::Loaded);
    assert!(loader.unloaded.lock().is_empty());

    runtime.unload(handle);
    assert_eq!(runtime.status(handle), PakStatus::Freed);
    assert_eq!(
        *loader.unloaded.lock(),
        vec![PakGuid(0x100), PakGuid(0x101), PakGuid(0x102)]
    );
    assert!(runtime.asset(PakGuid(0x100)).is_none());
    assert!(runtime.read_bytes(handle, rpak_format::PagePtr::new(1, 0), 4).is_none());

    // A second unload is a no-op.
    runtime.unload(handle);
    assert_eq!(runtime.status(handle), PakStatus::Freed);
}

#[test]
fn test_stale_handle_after_reuse() {
    let io = Arc::new(MemoryIo::new());
    io.insert(platform("a.rpak"), basic_pak(0x100, 1).build());
    io.insert(platform("b.rpak"), basic_pak(0x200, 1).build());
    let runtime = runtime(&io);

    let first = load(&runtime, "a.rpak");
    assert_eq!(runtime.wait(first), PakStatus::Loaded);
    runtime.unload(first);

    let second = load(&runtime, "b.rpak");
    assert_eq!(second.slot(), first.slot());
    assert_ne!(second.generation(), first.generation());

    assert_eq!(runtime.status(first), PakStatus::InvalidHandle);
    assert_eq!(runtime.drive(first), PakStatus::InvalidHandle);
    assert!(runtime.info(first).is_none());
    runtime.unload(first);

    assert_eq!(runtime.wait(second), PakStatus::Loaded);
    assert!(runtime.asset(PakGuid(0x200)).is_some());
}

#[test]
fn test_container_table_full() {
    let io = Arc::new(MemoryIo::new());
    for (index, name) in ["a.rpak", "b.rpak", "c.rpak"].into_iter().enumerate() {
        io.insert(platform(name), basic_pak(0x100 * (index as u64 + 1), 1).build());
    }
    let runtime = runtime_with(
        &io,
        PakConfig {
            max_loaded_paks: 2,
            ..config()
        },
    );

    let a = load(&runtime, "a.rpak");
    let _b = load(&runtime, "b.rpak");
    let full = runtime.load("c.rpak", Arc::new(DefaultAllocator), IoPriority::High, LoadFlags::NONE);
    assert!(full.is_none());

    runtime.unload(a);
    let c = runtime
        .load("c.rpak", Arc::new(DefaultAllocator), IoPriority::High, LoadFlags::NONE)
        .unwrap();
    assert_eq!(c.slot(), a.slot());
    assert_eq!(runtime.wait(c), PakStatus::Loaded);
}

#[test]
fn test_tick_drives_everything() {
    let io = Arc::new(MemoryIo::with_latency(1));
    for (index, name) in ["a.rpak", "b.rpak", "c.rpak"].into_iter().enumerate() {
        io.insert(platform(name), basic_pak(0x1000 * (index as u64 + 1), 2).build());
    }
    let runtime = runtime(&io);
    let handles: Vec<_> = ["a.rpak", "b.rpak", "c.rpak"]
        .into_iter()
        .map(|name| load(&runtime, name))
        .collect();

    let mut ticks = 0;
    while runtime.tick() > 0 {
        ticks += 1;
        assert!(ticks < 10_000, "containers never settled");
    }
    for handle in handles {
        assert_eq!(runtime.status(handle), PakStatus::Loaded);
    }
    assert_eq!(runtime.registry().len(), 6);
}

#[test]
fn test_swap_reloads_with_same_allocator() {
    let io = Arc::new(MemoryIo::with_latency(1));
    io.insert(platform("ui.rpak"), basic_pak(0x100, 2).build());
    let runtime = runtime(&io);
    let loader = Arc::new(RecordingLoader::default());
    bind(&runtime, Arc::clone(&loader));
    let allocator = Arc::new(CountingAllocator::new());

    let handle = load_with(&runtime, "ui.rpak", allocator.clone(), LoadFlags::NONE);
    assert_eq!(runtime.wait(handle), PakStatus::Loaded);
    let first_calls = allocator.calls();
    assert!(first_calls > 0);

    let swapped = runtime.swap(handle).unwrap();
    assert_eq!(swapped.slot(), handle.slot());
    assert_ne!(swapped.generation(), handle.generation());
    assert_eq!(runtime.status(handle), PakStatus::InvalidHandle);
    assert_eq!(loader.unloaded.lock().len(), 2);

    assert_eq!(runtime.wait(swapped), PakStatus::Loaded);
    assert_eq!(allocator.calls(), first_calls * 2);
    assert_eq!(runtime.info(swapped).unwrap().name, "ui.rpak");
    assert_eq!(runtime.asset(PakGuid(0x101)).unwrap().pak, swapped);
    assert_eq!(loader.loaded.lock().len(), 4);
}

#[test]
fn test_swap_mid_load() {
    let io = Arc::new(MemoryIo::with_latency(2));
    io.insert(platform("ui.rpak"), basic_pak(0x100, 3).build());
    let runtime = runtime(&io);

    let handle = load(&runtime, "ui.rpak");
    runtime.drive(handle);
    assert!(runtime.status(handle).is_loading());

    let swapped = runtime.swap(handle).unwrap();
    assert_eq!(runtime.wait(swapped), PakStatus::Loaded);
    assert_eq!(runtime.registry().len(), 3);
    assert_eq!(runtime.loaded_paks().len(), 1);
}

#[test]
fn test_swap_refused_while_dependents_remain() {
    let io = Arc::new(MemoryIo::new());
    io.insert(platform("base.rpak"), basic_pak(0x100, 2).build());
    io.insert(platform("level.rpak"), dependent_pak(0x200, 0x101).build());
    let runtime = runtime(&io);

    let base = load(&runtime, "base.rpak");
    assert_eq!(runtime.wait(base), PakStatus::Loaded);
    let level = load(&runtime, "level.rpak");
    assert_eq!(runtime.wait(level), PakStatus::Loaded);

    assert!(runtime.swap(base).is_none());
    assert_eq!(runtime.status(base), PakStatus::UnloadPending);

    runtime.unload(level);
    runtime.tick();
    assert_eq!(runtime.status(base), PakStatus::Freed);
    // Nothing left to swap.
    assert!(runtime.swap(base).is_none());
    assert!(runtime.loaded_paks().is_empty());
}
