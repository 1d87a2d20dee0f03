//! Crate-specific error types for mapped-region.

use std::io;
use thiserror::Error;

/// Result alias for mapped-region operations.
pub type Result<T> = std::result::Result<T, MmapError>;

/// Error type covering native failures, bounds violations and lifecycle misuse.
#[derive(Debug, Error)]
pub enum MmapError {
    /// Native OS error from open, truncate, map, unmap or flush, passed through unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation attempted on a region with no live buffer (never mapped or already closed).
    #[error("unmapped memory")]
    UnmappedMemory,

    /// Error when a requested offset/length pair is out of bounds.
    #[error("offset out of mapped region: offset={offset}, len={len}, total={total}")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Total length of the mapped region.
        total: u64,
    },

    /// The shared advisory lock on the backing file could not be acquired.
    #[error("advisory lock acquisition failed: {0}")]
    LockFailed(#[source] io::Error),

    /// Bytes read into a text buffer were not valid UTF-8.
    #[error("invalid UTF-8 in mapped region at offset {offset}")]
    InvalidUtf8 {
        /// Absolute offset of the first invalid byte.
        offset: u64,
    },

    /// Error returned when attempting an operation the mapping's protection does not allow.
    #[error("invalid access mode: {0}")]
    InvalidMode(&'static str),
}

impl MmapError {
    /// Whether this error came from advisory lock acquisition.
    #[must_use]
    pub fn is_lock_error(&self) -> bool {
        matches!(self, Self::LockFailed(_))
    }

    /// Native error code for errors that originate in a system call.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(e) | Self::LockFailed(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_error_keeps_native_source() {
        let err = MmapError::LockFailed(io::Error::from_raw_os_error(11));
        assert!(err.is_lock_error());
        assert_eq!(err.raw_os_error(), Some(11));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("advisory lock acquisition failed"));
    }

    #[test]
    fn bounds_message() {
        let err = MmapError::OutOfBounds { offset: 4090, len: 8, total: 4096 };
        assert_eq!(
            err.to_string(),
            "offset out of mapped region: offset=4090, len=8, total=4096"
        );
        assert_eq!(err.raw_os_error(), None);
    }
}
