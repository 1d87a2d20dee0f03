//! Platform parity tests for flush visibility and mapping offsets.
//!
//! Contract: after `flush()`, reading the backing file through ordinary file
//! I/O observes the written bytes on every supported platform.

use mapped_region::{
    page_aligned_offset, page_size, MappedRegion, OpenFlags, Protection, RegionOptions,
};
use std::fs;

#[test]
fn parity_flush_visibility_full_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("parity_full.dat");

    let region = MappedRegion::create(&path, OpenFlags::CREATE_READ_WRITE, 4096).expect("create");
    region.write_at(b"ABCDEFGHIJ", 0).expect("write-1");
    region.write_at(b"klmnop", 100).expect("write-2");
    region.flush().expect("flush");

    let bytes = fs::read(&path).expect("read file");
    assert_eq!(&bytes[0..10], b"ABCDEFGHIJ");
    assert_eq!(&bytes[100..106], b"klmnop");
    region.close().expect("close");
}

#[test]
fn unaligned_offset_maps_logical_view() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("parity_offset.dat");
    let ps = page_size() as u64;
    let offset = page_aligned_offset(ps * 20) + 13;

    let region = RegionOptions::new()
        .offset(offset)
        .size(10)
        .open(&path)
        .expect("open at offset");
    assert_eq!(region.offset(), offset);
    assert_eq!(region.len(), ps);

    region.write_at(b"logical-0", 0).expect("write");
    region.flush().expect("flush");
    region.close().expect("close");

    let bytes = fs::read(&path).expect("read file");
    let start = offset as usize;
    assert_eq!(&bytes[start..start + 9], b"logical-0");
    assert!(bytes.len() as u64 >= offset + ps);
}

#[test]
fn copy_on_write_does_not_reach_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("parity_cow.dat");
    let region = MappedRegion::create(&path, OpenFlags::CREATE_READ_WRITE, 1).expect("create");
    region.write_at(b"original", 0).expect("seed");
    region.flush().expect("flush");
    region.close().expect("close");

    let cow = RegionOptions::new()
        .flags(OpenFlags::READ_ONLY)
        .protection(Protection::READ | Protection::COPY)
        .open(&path)
        .expect("open cow");
    cow.write_at(b"private!", 0).expect("private write");
    let mut buf = [0u8; 8];
    cow.read_at(&mut buf, 0).expect("read");
    assert_eq!(&buf, b"private!");
    cow.flush().expect("flush cow");
    cow.close().expect("close cow");

    assert_eq!(&fs::read(&path).expect("read file")[..8], b"original");
}

#[test]
fn map_existing_file_without_resizing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("parity_map.dat");
    let ps = page_size() as u64;
    fs::write(&path, vec![1u8; ps as usize * 2]).expect("seed");

    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .expect("open");
    let region = MappedRegion::map(file, ps, ps, Protection::READ_WRITE).expect("map");
    assert!(region.path().is_none());
    region.write_u64_at(7, 0).expect("write");
    region.flush().expect("flush");
    region.close().expect("close");

    let bytes = fs::read(&path).expect("read file");
    assert_eq!(bytes.len() as u64, ps * 2);
    assert_eq!(&bytes[ps as usize..ps as usize + 8], &7u64.to_le_bytes());
    assert_eq!(bytes[0], 1);
}

#[test]
fn map_rounds_partial_length_to_a_page() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("parity_map_partial.dat");
    let ps = page_size() as u64;
    fs::write(&path, vec![0u8; ps as usize]).expect("seed");

    let open = || {
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .expect("open")
    };
    let region = MappedRegion::map(open(), 0, 10, Protection::READ_WRITE).expect("map");
    assert_eq!(region.len(), ps);
    let mut buf = [0u8; 20];
    assert_eq!(region.read_at(&mut buf, 0).expect("read past requested length"), 20);
    region.close().expect("close");

    let too_long = MappedRegion::map(open(), 0, ps + 1, Protection::READ_WRITE)
        .expect_err("file covers a single page");
    assert!(matches!(
        too_long,
        mapped_region::MmapError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof
    ));
    let zero = MappedRegion::map(open(), 0, 0, Protection::READ_WRITE).expect_err("zero length");
    assert!(matches!(
        zero,
        mapped_region::MmapError::Io(ref e) if e.kind() == std::io::ErrorKind::InvalidInput
    ));
}
