//! Platform backends performing the native map, unmap, flush and lock calls.
//!
//! Exactly one backend is compiled in and exported as [`Native`]:
//! - **Unix**: `mmap`/`msync`/`munmap` with `flock` advisory locking ([`unix::PosixBackend`])
//! - **Windows**: `CreateFileMappingW` + `MapViewOfFile`, `FlushViewOfFile`; no
//!   advisory locking ([`windows::WindowsBackend`])
//!
//! Backends report native errors without interpretation. The one exception is
//! lock acquisition, which is wrapped in [`MmapError::LockFailed`](crate::MmapError::LockFailed)
//! so callers can tell it apart from mapping failures.

use std::fmt;
use std::fs::File;
use std::io;
use std::ptr::NonNull;

use crate::errors::Result;
use crate::protection::Protection;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod unix;
        /// Backend selected for the build target.
        pub use self::unix::PosixBackend as Native;
    } else if #[cfg(windows)] {
        pub mod windows;
        /// Backend selected for the build target.
        pub use self::windows::WindowsBackend as Native;
    } else {
        compile_error!("mapped-region supports unix and windows targets only");
    }
}

/// A live native mapping.
///
/// The native view starts at the aligned file offset; the logical buffer the
/// caller asked for starts `delta` bytes into it.
pub struct RawView {
    base: NonNull<u8>,
    native_len: usize,
    delta: usize,
}

// SAFETY: the view is plain memory owned by the region holding it; every
// access goes through that region's lock.
unsafe impl Send for RawView {}
unsafe impl Sync for RawView {}

impl RawView {
    /// Assemble a view from its native parts.
    ///
    /// # Safety
    ///
    /// `base` must point to `native_len` bytes of mapped memory that remain
    /// valid until the view is released by the backend that produced it, and
    /// `delta` must not exceed `native_len`.
    #[must_use]
    pub unsafe fn from_raw_parts(base: NonNull<u8>, native_len: usize, delta: usize) -> Self {
        debug_assert!(delta <= native_len);
        Self { base, native_len, delta }
    }

    /// Start of the native view (aligned).
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length of the native view, including the alignment prefix.
    #[must_use]
    pub fn native_len(&self) -> usize {
        self.native_len
    }

    /// Distance between the native view start and the logical buffer start.
    #[must_use]
    pub fn delta(&self) -> usize {
        self.delta
    }

    /// Length of the logical buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.native_len - self.delta
    }

    /// Whether the logical buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pointer to the first logical byte.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        // SAFETY: delta <= native_len, so the result stays inside the view.
        unsafe { self.base.as_ptr().add(self.delta) }
    }

    /// The logical buffer as a slice.
    ///
    /// # Safety
    ///
    /// No mutable access to the buffer may happen for the returned lifetime.
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.as_ptr(), self.len())
    }

    /// The logical buffer as a mutable slice.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the buffer for the returned
    /// lifetime and the mapping must be writable.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.as_ptr(), self.len())
    }
}

impl fmt::Debug for RawView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawView")
            .field("base", &self.base)
            .field("native_len", &self.native_len)
            .field("delta", &self.delta)
            .finish()
    }
}

/// Native mapping primitives for one platform.
///
/// Implementations are stateless; a region is generic over its backend so
/// the choice is made at build time.
pub trait Backend {
    /// Native protection/mapping-type pair produced by [`Backend::translate`].
    type Flags: Copy + Eq + fmt::Debug;

    /// Translate a protection request into native flags. Total over every flag combination.
    fn translate(protection: Protection) -> Self::Flags;

    /// Map `len` bytes of `file` starting at the (possibly unaligned) `offset`.
    ///
    /// # Errors
    ///
    /// Returns the native error unchanged. A zero `len` is rejected with
    /// `InvalidInput`.
    fn map(file: &File, offset: u64, len: usize, protection: Protection) -> io::Result<RawView>;

    /// Release a view.
    ///
    /// # Safety
    ///
    /// `view` must have been produced by this backend's [`Backend::map`] and,
    /// on success, must not be used again.
    unsafe fn unmap(view: &RawView) -> io::Result<()>;

    /// Synchronously write the whole view back to its file.
    ///
    /// # Errors
    ///
    /// Returns the native error unchanged.
    fn flush(view: &RawView) -> io::Result<()>;

    /// Take a shared, non-blocking advisory lock on `file`.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::LockFailed` wrapping the native error.
    fn lock(file: &File) -> Result<()>;

    /// Release the advisory lock on `file`.
    ///
    /// # Errors
    ///
    /// Returns the native error unchanged.
    fn unlock(file: &File) -> io::Result<()>;
}

/// Split an unaligned request into `(aligned offset, delta, native length)`.
pub(crate) fn native_extent(offset: u64, len: usize) -> io::Result<(u64, usize, usize)> {
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot map a zero-length region",
        ));
    }
    let aligned = crate::utils::page_aligned_offset(offset);
    let delta = usize::try_from(offset - aligned)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let native_len = len
        .checked_add(delta)
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
    Ok((aligned, delta, native_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::allocation_granularity;

    #[test]
    fn extent_of_aligned_request() {
        let (aligned, delta, native) = native_extent(0, 4096).expect("extent");
        assert_eq!((aligned, delta, native), (0, 0, 4096));
    }

    #[test]
    fn extent_of_sub_page_request() {
        let g = allocation_granularity();
        let (aligned, delta, native) = native_extent(g + 100, 50).expect("extent");
        assert_eq!(aligned, g);
        assert_eq!(delta, 100);
        assert_eq!(native, 150);
    }

    #[test]
    fn zero_length_rejected() {
        let err = native_extent(0, 0).expect_err("zero length");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
