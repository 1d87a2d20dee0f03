#![cfg(feature = "async")]
//! Async helper tests: creation and flushing from a Tokio runtime.

use mapped_region::{create_region_async, flush_async, page_size};
use std::fs;

#[tokio::test(flavor = "multi_thread")]
async fn async_create_then_flush_persists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("async_create.dat");

    let region = create_region_async(&path, 10).await.expect("create_region_async");
    assert_eq!(region.len(), page_size() as u64);

    region.write_at(b"ASYNC-FLUSH", 128).expect("write");
    flush_async(&region).await.expect("flush_async");
    assert!(!region.is_dirty());

    let bytes = fs::read(&path).expect("read file");
    assert_eq!(&bytes[128..139], b"ASYNC-FLUSH");
    region.close().expect("close");
}

#[tokio::test(flavor = "multi_thread")]
async fn async_flush_of_clean_region_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let region = create_region_async(dir.path().join("async_clean.dat"), 1)
        .await
        .expect("create_region_async");
    flush_async(&region).await.expect("flush_async");
    assert!(!region.is_dirty());
}

#[tokio::test(flavor = "multi_thread")]
async fn async_create_rejects_zero_size() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(create_region_async(dir.path().join("async_zero.dat"), 0)
        .await
        .is_err());
}
