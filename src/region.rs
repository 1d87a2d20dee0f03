//! Offset-addressable view over a memory-mapped file with dirty tracking.

use std::fmt;
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{MmapError, Result};
use crate::flush::{FlushPolicy, FlushTracker};
use crate::options::{ensure_file_covers, OpenFlags, RegionOptions};
use crate::protection::Protection;
use crate::sys::{Backend, Native, RawView};
use crate::utils::{ensure_in_bounds, round_up_to_page_size, slice_range};

const U64_LEN: u64 = std::mem::size_of::<u64>() as u64;

struct State {
    // `Some` exactly while the region is mapped
    view: Option<RawView>,
    dirty: bool,
    locked: bool,
    tracker: FlushTracker,
}

struct Inner<B: Backend> {
    path: Option<PathBuf>,
    file: File,
    offset: u64,
    len: u64,
    protection: Protection,
    flush_policy: FlushPolicy,
    state: RwLock<State>,
    _backend: PhantomData<fn() -> B>,
}

/// A file mapped into memory and addressed by byte offset.
///
/// The region starts Unmapped, becomes Mapped once the backend call succeeds,
/// and becomes Unmapped for good after [`close`](Self::close). Every access
/// goes through one reader/writer lock: reads run concurrently, a write
/// excludes everything else for its duration.
///
/// # Examples
///
/// ```no_run
/// use mapped_region::{MappedRegion, OpenFlags};
///
/// // 1 byte requested, one page mapped
/// let region = MappedRegion::create("data.bin", OpenFlags::CREATE_READ_WRITE, 1)?;
///
/// region.write_u64_at(42, 0)?;
/// region.write_at(b"Hello, mmap!", 8)?;
/// region.flush()?;
///
/// let mut buf = [0u8; 12];
/// region.read_at(&mut buf, 8)?;
/// assert_eq!(&buf, b"Hello, mmap!");
/// region.close()?;
/// # Ok::<(), mapped_region::MmapError>(())
/// ```
///
/// Cloning is cheap; clones share the same mapping, lock and dirty flag.
pub struct MappedRegion<B: Backend = Native> {
    inner: Arc<Inner<B>>,
}

impl<B: Backend> Clone for MappedRegion<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> fmt::Debug for MappedRegion<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("MappedRegion")
            .field("path", &self.inner.path)
            .field("offset", &self.inner.offset)
            .field("len", &self.inner.len)
            .field("protection", &self.inner.protection)
            .field("mapped", &state.view.is_some())
            .field("dirty", &state.dirty)
            .finish()
    }
}

impl MappedRegion {
    /// Open or create `path`, truncate it to `size` rounded up to the page
    /// size, map it read-write and take a shared advisory lock.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Io` if open, truncate or map fails and
    /// `MmapError::LockFailed` if the lock is refused; the mapping is torn
    /// down before a lock error is returned.
    pub fn create<P: AsRef<Path>>(path: P, flags: OpenFlags, size: u64) -> Result<Self> {
        RegionOptions::new()
            .flags(flags)
            .size(size)
            .protection(Protection::READ_WRITE)
            .open(path)
    }

    /// Builder for regions needing a non-default offset, protection or flush policy.
    #[must_use]
    pub fn options() -> RegionOptions {
        RegionOptions::new()
    }

    /// Map an already-open `file` starting at `offset`, covering `len` bytes
    /// rounded up to the page size.
    ///
    /// The file is neither resized nor locked; it must already reach the last
    /// mapped page.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Io` with `InvalidInput` for a zero or overflowing
    /// `len`, `UnexpectedEof` if the file is too short, and the native error
    /// if the mapping fails.
    pub fn map(file: File, offset: u64, len: u64, protection: Protection) -> Result<Self> {
        let invalid = || io::Error::from(io::ErrorKind::InvalidInput);
        let len = round_up_to_page_size(len)
            .filter(|len| *len > 0)
            .ok_or_else(invalid)?;
        let end = offset.checked_add(len).ok_or_else(invalid)?;
        ensure_file_covers(file.metadata()?.len(), end)?;
        Self::establish(file, None, offset, len, protection, false, FlushPolicy::Manual)
    }
}

impl<B: Backend> MappedRegion<B> {
    pub(crate) fn establish(
        file: File,
        path: Option<PathBuf>,
        offset: u64,
        len: u64,
        protection: Protection,
        advisory_lock: bool,
        flush_policy: FlushPolicy,
    ) -> Result<Self> {
        let native_len = usize::try_from(len)
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let view = B::map(&file, offset, native_len, protection)?;

        if advisory_lock {
            if let Err(err) = B::lock(&file) {
                // SAFETY: the view came from B::map and is dropped right after.
                if let Err(unmap_err) = unsafe { B::unmap(&view) } {
                    log::warn!("unmap after failed lock on {path:?}: {unmap_err}");
                }
                return Err(err);
            }
        }

        log::debug!(
            "mapped {path:?} offset={offset} len={len} protection={protection:?}"
        );
        let inner = Inner {
            path,
            file,
            offset,
            len,
            protection,
            flush_policy,
            state: RwLock::new(State {
                view: Some(view),
                dirty: false,
                locked: advisory_lock,
                tracker: FlushTracker::new(),
            }),
            _backend: PhantomData,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Mapped length in bytes; always a multiple of the page size.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.len
    }

    /// Whether the mapped length is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// File offset of the first mapped byte.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.inner.offset
    }

    /// Path of the backing file, when the region was opened by path.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Protection the region was mapped with.
    #[must_use]
    pub fn protection(&self) -> Protection {
        self.inner.protection
    }

    /// Flush policy applied after writes.
    #[must_use]
    pub fn flush_policy(&self) -> FlushPolicy {
        self.inner.flush_policy
    }

    /// Whether the region still holds a live mapping.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.inner.state.read().view.is_some()
    }

    /// Whether a write may have happened since the last successful flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.state.read().dirty
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::UnmappedMemory` after close and
    /// `MmapError::OutOfBounds` if the range exceeds the mapped length.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        let state = self.inner.state.read();
        let view = state.view.as_ref().ok_or(MmapError::UnmappedMemory)?;
        let (start, end) = slice_range(offset, dst.len() as u64, self.inner.len)?;
        // SAFETY: the read guard excludes writers for the lifetime of the slice.
        let src = unsafe { view.as_slice() };
        dst.copy_from_slice(&src[start..end]);
        Ok(dst.len())
    }

    /// Copy `src` into the region starting at `offset`.
    ///
    /// The region is marked dirty before the bounds check, so a rejected
    /// write still makes the next `flush()` issue a sync. Writes to a closed
    /// region leave its state untouched.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidMode` for mappings without write access,
    /// `MmapError::UnmappedMemory` after close, `MmapError::OutOfBounds` if
    /// the range exceeds the mapped length, and flush errors when the flush
    /// policy fires.
    pub fn write_at(&self, src: &[u8], offset: u64) -> Result<usize> {
        if !self.inner.protection.is_writable() {
            return Err(MmapError::InvalidMode("write requires WRITE or COPY protection"));
        }
        let mut state = self.inner.state.write();
        if state.view.is_none() {
            return Err(MmapError::UnmappedMemory);
        }
        state.dirty = true;
        let view = state.view.as_ref().ok_or(MmapError::UnmappedMemory)?;
        let (start, end) = slice_range(offset, src.len() as u64, self.inner.len)?;
        // SAFETY: the write guard gives exclusive access and the protection is writable.
        let dst = unsafe { view.as_mut_slice() };
        dst[start..end].copy_from_slice(src);

        if state.tracker.record(self.inner.flush_policy, src.len()) {
            self.flush_locked(&mut state)?;
        }
        Ok(src.len())
    }

    /// Text counterpart of [`write_at`](Self::write_at).
    ///
    /// # Errors
    ///
    /// Same as [`write_at`](Self::write_at).
    pub fn write_str_at(&self, src: &str, offset: u64) -> Result<usize> {
        self.write_at(src.as_bytes(), offset)
    }

    /// Read a little-endian `u64` at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`read_at`](Self::read_at).
    pub fn read_u64_at(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; U64_LEN as usize];
        self.read_at(&mut buf, offset)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write `value` as a little-endian `u64` at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`write_at`](Self::write_at).
    pub fn write_u64_at(&self, value: u64, offset: u64) -> Result<()> {
        self.write_at(&value.to_le_bytes(), offset).map(|_| ())
    }

    /// Append bytes starting at `offset` to `dst` without growing it.
    ///
    /// Copies `min(len - offset, dst.capacity() - dst.len())` bytes. A UTF-8
    /// sequence cut off by that limit is left out rather than split. Returns
    /// the number of bytes appended.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::UnmappedMemory` after close,
    /// `MmapError::OutOfBounds` if `offset` lies past the end, and
    /// `MmapError::InvalidUtf8` if the bytes are not text.
    pub fn read_string_into(&self, dst: &mut String, offset: u64) -> Result<usize> {
        let state = self.inner.state.read();
        let view = state.view.as_ref().ok_or(MmapError::UnmappedMemory)?;
        ensure_in_bounds(offset, 0, self.inner.len)?;

        let available = self.inner.len - offset;
        let room = (dst.capacity() - dst.len()) as u64;
        let (start, end) = slice_range(offset, available.min(room), self.inner.len)?;
        // SAFETY: the read guard excludes writers for the lifetime of the slice.
        let bytes = unsafe { &view.as_slice()[start..end] };

        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) if e.error_len().is_none() => {
                // SAFETY: from_utf8 validated everything before valid_up_to.
                unsafe { std::str::from_utf8_unchecked(&bytes[..e.valid_up_to()]) }
            }
            Err(e) => {
                return Err(MmapError::InvalidUtf8 {
                    offset: offset + e.valid_up_to() as u64,
                })
            }
        };
        dst.push_str(text);
        Ok(text.len())
    }

    /// Synchronously write dirty pages back to the file.
    ///
    /// A clean region returns immediately without a native call. The dirty
    /// flag is cleared only when the native flush succeeds.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::UnmappedMemory` after close and `MmapError::Io`
    /// with the native error if the sync fails.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut State) -> Result<()> {
        let view = state.view.as_ref().ok_or(MmapError::UnmappedMemory)?;
        if !state.dirty {
            log::trace!("flush skipped for clean region {:?}", self.inner.path);
            return Ok(());
        }
        B::flush(view)?;
        state.dirty = false;
        state.tracker.reset();
        log::debug!("flushed {:?} len={}", self.inner.path, self.inner.len);
        Ok(())
    }

    /// Release the advisory lock (best effort) and unmap the region.
    ///
    /// Does not flush. Every clone observes the region as unmapped afterwards.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::UnmappedMemory` if the region is already closed
    /// and `MmapError::Io` if the native unmap fails, in which case the
    /// region stays mapped.
    pub fn close(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        if state.locked {
            match B::unlock(&self.inner.file) {
                Ok(()) => state.locked = false,
                Err(e) => log::warn!("advisory unlock of {:?} failed: {e}", self.inner.path),
            }
        }
        let view = state.view.as_ref().ok_or(MmapError::UnmappedMemory)?;
        // SAFETY: the view came from B::map; the write guard guarantees no
        // borrowed slices and the view is discarded below.
        unsafe { B::unmap(view)? };
        state.view = None;
        log::debug!("unmapped {:?}", self.inner.path);
        Ok(())
    }
}

impl<B: Backend> Drop for Inner<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.locked {
            if let Err(e) = B::unlock(&self.file) {
                log::warn!("advisory unlock of {:?} failed on drop: {e}", self.path);
            }
        }
        if let Some(view) = state.view.take() {
            log::debug!("unmapping {:?} on drop without close", self.path);
            // SAFETY: last owner; the view came from B::map.
            if let Err(e) = unsafe { B::unmap(&view) } {
                log::warn!("unmap of {:?} failed on drop: {e}", self.path);
            }
        }
    }
}
