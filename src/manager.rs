//! High-level API for managing mapped regions.
//!
//! Provides convenience functions that wrap `MappedRegion` construction and lifecycle.

use std::path::Path;

use crate::errors::Result;
use crate::options::{OpenFlags, RegionOptions};
use crate::protection::Protection;
use crate::region::MappedRegion;

/// Create (or reuse) `path` as a read-write region of at least `size` bytes.
///
/// # Errors
///
/// Returns errors from `MappedRegion::create`.
pub fn create_region<P: AsRef<Path>>(path: P, size: u64) -> Result<MappedRegion> {
    MappedRegion::create(path, OpenFlags::CREATE_READ_WRITE, size)
}

/// Map an existing file over its whole length with the requested protection.
///
/// Writable protections open the file read-write; `READ`/`EXEC` alone open it
/// read-only. A length that is not a page multiple is rounded up.
///
/// # Errors
///
/// Returns errors from opening, sizing, mapping or locking the file.
pub fn load_region<P: AsRef<Path>>(path: P, protection: Protection) -> Result<MappedRegion> {
    let flags = if protection.contains(Protection::WRITE) {
        OpenFlags::READ_WRITE
    } else {
        OpenFlags::READ_ONLY
    };
    RegionOptions::new()
        .flags(flags)
        .protection(protection)
        .open(path)
}

/// Write bytes at an offset into an existing file through a temporary
/// mapping, flushing and closing it before returning.
///
/// # Errors
///
/// Returns errors from loading, writing, flushing or closing the region.
pub fn write_region<P: AsRef<Path>>(path: P, offset: u64, data: &[u8]) -> Result<()> {
    let region = load_region(path, Protection::READ_WRITE)?;
    region.write_at(data, offset)?;
    region.flush()?;
    region.close()
}

/// Flush an existing region.
///
/// # Errors
///
/// Returns errors from `MappedRegion::flush`.
pub fn flush(region: &MappedRegion) -> Result<()> {
    region.flush()
}

#[cfg(feature = "async")]
pub mod r#async {
    //! Async helpers (Tokio) that keep blocking file work off the async workers.
    use std::io;
    use std::path::Path;

    use tokio::fs as tfs;

    use crate::errors::{MmapError, Result};
    use crate::options::OpenFlags;
    use crate::region::MappedRegion;
    use crate::utils::round_up_to_page_size;

    /// Create and size the backing file asynchronously, then map it read-write.
    ///
    /// # Errors
    ///
    /// Returns errors from async file operations or mapping.
    pub async fn create_region_async<P: AsRef<Path>>(path: P, size: u64) -> Result<MappedRegion> {
        let path_ref = path.as_ref();
        let len = round_up_to_page_size(size)
            .filter(|len| *len > 0)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        let file = tfs::OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .truncate(false)
            .open(path_ref)
            .await?;
        file.set_len(len).await?;
        drop(file);
        MappedRegion::create(path_ref, OpenFlags::READ_WRITE, len)
    }

    /// Run `flush` on Tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Returns errors from `MappedRegion::flush`, or `MmapError::Io` if the
    /// blocking task panicked or was cancelled.
    pub async fn flush_async(region: &MappedRegion) -> Result<()> {
        let region = region.clone();
        tokio::task::spawn_blocking(move || region.flush())
            .await
            .map_err(|e| MmapError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }
}
