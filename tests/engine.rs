use tempfile::tempdir;
use zpack::{CompressionMethod, ErrorKind, ZPack};

#[test]
fn reopen_without_changes_keeps_archive_size_stable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s1.zpk");

    {
        let mut archive = ZPack::open(&path, true).unwrap();
        archive
            .pack_item(
                "a",
                b"AZZZAKAJSLKDNLAK SNDLK NSFLAKSNF ALKSFN ALKSFN ALKSFN LKFN ALSKNFALKSNFKsldknf",
                "",
                "",
            )
            .unwrap();
        archive.write().unwrap();
        archive.close();
    }

    let stats1 = {
        let archive = ZPack::open(&path, false).unwrap();
        archive.stats()
    };

    let stats2 = {
        let mut archive = ZPack::open(&path, false).unwrap();
        archive.write().unwrap();
        archive.stats()
    };

    assert_eq!(stats1.archive_size, stats2.archive_size);
}

#[test]
fn extract_str_round_trips_small_item() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s2.zpk");

    let payload = "x".repeat(300);
    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("a", payload.as_bytes(), "", "").unwrap();
    archive.write().unwrap();

    let extracted = archive.extract_str("a");
    assert_eq!(extracted.len(), payload.len());
    assert_eq!(extracted, payload);
}

#[test]
fn remove_then_repack_shrinks_offsets_monotonically() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s3.zpk");

    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("a", &vec![1u8; 2048], "", "").unwrap();
    archive.pack_item("b", &vec![2u8; 2048], "", "").unwrap();
    archive.write().unwrap();
    let offset_a = archive.stats().last_offset;

    archive.remove("b");
    archive.write().unwrap();
    let offset_b = archive.stats().last_offset;

    archive.repack().unwrap();
    archive.write().unwrap();
    let offset_c = archive.stats().last_offset;

    assert!(offset_b < offset_a);
    assert!(offset_c < offset_b);
    assert!(offset_c > 0);
}

#[test]
fn large_item_is_streamed_and_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s4.zpk");

    let size = 8 * 1024 * 1024;
    let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("big", &payload, "", "").unwrap();
    archive.write().unwrap();

    let extracted = archive.extract_checked("big").unwrap();
    assert_eq!(extracted, payload);
}

#[test]
fn tiny_item_is_stored_uncompressed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s5.zpk");

    let payload = "hello".repeat(8);
    assert_eq!(payload.len(), 40);

    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("small", payload.as_bytes(), "", "").unwrap();
    archive.write().unwrap();

    let extracted = archive.extract_str("small");
    assert_eq!(extracted, payload);
}

#[test]
fn corrupted_directory_signature_sets_fail_state_but_stays_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s6.zpk");

    std::fs::write(&path, vec![0u8; 64]).unwrap();

    let archive = ZPack::open(&path, false).unwrap();
    assert!(archive.fail());
    assert!(archive.bad());
}

#[test]
fn pack_item_rejects_empty_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.zpk");

    let mut archive = ZPack::open(&path, true).unwrap();
    let err = archive.pack_item("nothing", b"", "", "").unwrap_err();
    match err {
        zpack::ZPackError::Kind(ErrorKind::PackItemSize) => {}
        other => panic!("expected PackItemSize, got {other:?}"),
    }
}

#[test]
fn repacking_same_name_with_unchanged_size_and_mtime_is_a_noop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dedup.zpk");

    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("a", b"same bytes same bytes", "", "").unwrap();
    archive.write().unwrap();
    let before = archive.stats();

    // Re-inserting through pack_data's own dedup path requires going
    // through pack_file (which reads mtime from the filesystem); exercise
    // the dedup branch directly by re-packing the identical item through
    // pack_item, which always stamps "now" — so instead verify via two
    // consecutive packs of a freshly-written file with an unchanged mtime.
    let source = dir.path().join("source.bin");
    std::fs::write(&source, b"same bytes same bytes").unwrap();

    archive.pack_file(&source, "", "").unwrap();
    archive.write().unwrap();
    let after_first = archive.stats();

    archive.pack_file(&source, "", "").unwrap();
    archive.write().unwrap();
    let after_second = archive.stats();

    assert_eq!(after_first.archive_size, after_second.archive_size);
    assert!(before.archive_size > 0);
}

#[test]
fn crc_mismatch_is_detected_on_extract_checked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt.zpk");

    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("item", b"payload bytes for corruption test", "", "").unwrap();
    archive.write().unwrap();
    drop(archive);

    // Flip a byte inside the file somewhere past the header area; since
    // compressed payloads begin after the local header/name/extra fields,
    // corrupting near the end of the file lands inside the directory or
    // payload region depending on exact offsets, either of which should
    // surface as a mismatch or parse error.
    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut archive = ZPack::open(&path, false).unwrap();
    if archive.fail() {
        return;
    }
    match archive.extract_checked("item") {
        Ok(data) => assert_ne!(data, b"payload bytes for corruption test"),
        Err(zpack::ZPackError::CrcMismatch { .. }) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[test]
fn extract_file_writes_into_destination_directory() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("extract.zpk");
    let dest = dir.path().join("out");
    std::fs::create_dir_all(&dest).unwrap();

    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("notes.txt", b"meeting notes", "docs", "").unwrap();
    archive.write().unwrap();

    let wrote = archive.extract_file("docs/notes.txt", &dest).unwrap();
    assert!(wrote);

    let contents = std::fs::read_to_string(dest.join("docs/notes.txt")).unwrap();
    assert_eq!(contents, "meeting notes");
}

#[test]
fn archive_size_matches_file_size_after_repack() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sizes.zpk");

    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("a", &vec![7u8; 4096], "", "").unwrap();
    archive.pack_item("b", &vec![9u8; 4096], "", "").unwrap();
    archive.remove("a");
    archive.write().unwrap();
    archive.repack().unwrap();
    archive.write().unwrap();

    let on_disk = std::fs::metadata(&path).unwrap().len();
    assert_eq!(archive.stats().archive_size, on_disk);
}

#[test]
fn large_item_is_flagged_streamed_and_zstd() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("streamed.zpk");

    let size = 7 * 1024 * 1024;
    let payload = vec![0xABu8; size];

    let mut archive = ZPack::open(&path, true).unwrap();
    archive.pack_item("big", &payload, "", "").unwrap();
    archive.write().unwrap();

    // The item compresses extremely well (uniform bytes); regardless of
    // how small the Zstd output is, the payload exceeds the 6 MiB
    // single-step threshold and must go through the streamed path.
    let extracted = archive.extract_checked("big").unwrap();
    assert_eq!(extracted, payload);
}

#[test]
fn default_compression_method_round_trips() {
    assert_eq!(CompressionMethod::from_u16(0).unwrap(), CompressionMethod::None);
    assert_eq!(CompressionMethod::from_u16(1).unwrap(), CompressionMethod::Zstd);
    assert_eq!(CompressionMethod::from_u16(2).unwrap(), CompressionMethod::ZstdStream);
    assert!(CompressionMethod::from_u16(99).is_err());
}
