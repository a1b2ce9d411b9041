mod common;

use std::sync::Arc;

use common::*;
use rpak_codec::encode_container;
use rpak_common::PakGuid;
use rpak_format::{Compression, FormatLimits, PagePtr, PakBuilder, PatchFileHeader, PatchSpec};
use rpak_patch::EditStreamWriter;
use rpak_runtime::{IoError, LoadError, MemoryIo, PakStatus};

/// One chain file: its number, the bytes on disk and its decoded form.
struct ChainFile {
    number: u16,
    disk: Vec<u8>,
    decoded: Vec<u8>,
}

impl ChainFile {
    fn stored(number: u16, decoded: Vec<u8>) -> Self {
        Self {
            number,
            disk: decoded.clone(),
            decoded,
        }
    }

    fn compressed(number: u16, decoded: Vec<u8>, compression: Compression) -> Self {
        let disk = encode_container(&decoded, compression, 6, &FormatLimits::default()).unwrap();
        Self { number, disk, decoded }
    }
}

/// Turn `target` into a patch container rebuilding its tables and pages
/// from the decoded bodies of `chain`.
fn patch_container(target: &mut PakBuilder, chain: &[ChainFile]) -> Vec<u8> {
    let source: Vec<u8> = chain.iter().flat_map(|file| file.decoded[128..].to_vec()).collect();
    let edit_stream = EditStreamWriter::diff(&source, &target.reconstructed_region());
    target.patch(PatchSpec {
        files: chain
            .iter()
            .map(|file| PatchFileHeader {
                compressed_size: file.disk.len() as u64,
                decompressed_size: file.decoded.len() as u64,
            })
            .collect(),
        numbers: chain.iter().map(|file| file.number).collect(),
        edit_stream,
    });
    target.build()
}

fn install(io: &MemoryIo, name: &str, patched: Vec<u8>, chain: &[ChainFile]) {
    io.insert(platform(name), patched);
    for file in chain {
        io.insert(platform(&rpak_runtime::chain_file_name(name, file.number)), file.disk.clone());
    }
}

/// Three assets and a CPU page whose first 40 bytes changed.
fn next_version() -> PakBuilder {
    let mut builder = basic_pak(0x100, 3);
    for (index, byte) in builder.page_mut(1).unwrap().iter_mut().enumerate().take(40) {
        *byte = 0xC0 | (index as u8 & 0xF);
    }
    builder
}

fn check_next_version(runtime: &rpak_runtime::PakRuntime, handle: rpak_runtime::PakHandle) {
    assert_eq!(runtime.registry().len(), 3);
    for index in 0..3 {
        assert_eq!(runtime.asset_header(PakGuid(0x100 + index as u64)).unwrap(), asset_header(index));
    }
    let page = runtime.read_bytes(handle, PagePtr::new(1, 0), 200).unwrap();
    let expected = next_version().page_mut(1).unwrap().clone();
    assert_eq!(page, expected);
    assert_eq!(&page[40..], &cpu_page()[40..]);
}

#[test]
fn test_single_file_chain() {
    let chain = [ChainFile::stored(1, basic_pak(0x100, 2).build())];
    let patched = patch_container(&mut next_version(), &chain);

    let io = Arc::new(MemoryIo::with_latency(1));
    install(&io, "ui.rpak", patched, &chain);
    let runtime = runtime(&io);
    let loader = Arc::new(RecordingLoader::default());
    bind(&runtime, Arc::clone(&loader));

    let handle = load(&runtime, "ui.rpak");
    assert_eq!(runtime.wait(handle), PakStatus::Loaded);
    check_next_version(&runtime, handle);
    assert_eq!(loader.loaded.lock().len(), 3);
    assert!(runtime.info(handle).unwrap().patched);
    assert!(io.opened().contains(&platform("ui(01).rpak").into()));
    assert_eq!(io.open_files(), 0);
}

#[test]
fn test_two_file_chain_with_compressed_base() {
    let chain = [
        ChainFile::compressed(1, basic_pak(0x100, 2).build(), Compression::Deflate),
        ChainFile::stored(2, basic_pak(0x900, 1).build()),
    ];
    let patched = patch_container(&mut next_version(), &chain);

    let io = Arc::new(MemoryIo::new());
    install(&io, "ui.rpak", patched, &chain);
    let runtime = runtime(&io);

    let handle = load(&runtime, "ui.rpak");
    assert_eq!(runtime.wait(handle), PakStatus::Loaded);
    check_next_version(&runtime, handle);
    assert!(runtime.asset(PakGuid(0x900)).is_none());
    assert_eq!(io.open_files(), 0);
}

#[test]
fn test_chain_file_size_mismatch() {
    let mut chain = [ChainFile::stored(1, basic_pak(0x100, 2).build())];
    let patched = patch_container(&mut next_version(), &chain);
    // A different container under the chain file's name.
    chain[0].disk = basic_pak(0x100, 5).build();

    let io = Arc::new(MemoryIo::new());
    install(&io, "ui.rpak", patched, &chain);
    let runtime = runtime(&io);

    let handle = load(&runtime, "ui.rpak");
    assert_eq!(runtime.wait(handle), PakStatus::Error);
    match runtime.error(handle) {
        Some(LoadError::Format(message)) => assert!(message.contains("patch chain file"), "{message}"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(runtime.registry().is_empty());
}

#[test]
fn test_missing_chain_file() {
    let chain = [ChainFile::stored(3, basic_pak(0x100, 2).build())];
    let patched = patch_container(&mut next_version(), &chain);

    let io = Arc::new(MemoryIo::new());
    io.insert(platform("ui.rpak"), patched);
    let runtime = runtime(&io);

    let handle = load(&runtime, "ui.rpak");
    assert_eq!(runtime.wait(handle), PakStatus::Error);
    match runtime.error(handle) {
        Some(LoadError::Io(IoError::OpenFailed { name, .. })) => assert_eq!(name, "ui(03).rpak"),
        other => panic!("unexpected error {other:?}"),
    }

    runtime.unload(handle);
    runtime.tick();
    assert_eq!(runtime.status(handle), PakStatus::Freed);
    assert_eq!(io.open_files(), 0);
}
