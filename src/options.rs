//! Open flags and the builder used to configure a `MappedRegion`.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use crate::errors::{MmapError, Result};
use crate::flush::FlushPolicy;
use crate::protection::Protection;
use crate::region::MappedRegion;
use crate::sys::{Backend, Native};
use crate::utils::{align_up, page_size, round_up_to_page_size};

const ERR_ZERO_SIZE: &str = "size must be greater than zero";
const ERR_SIZE_OVERFLOW: &str = "size exceeds the addressable range";

/// How the backing file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Discard existing content before sizing the file.
    pub truncate: bool,
}

impl OpenFlags {
    /// Open an existing file read-only.
    pub const READ_ONLY: Self = Self {
        create: false,
        read: true,
        write: false,
        truncate: false,
    };

    /// Open an existing file read-write.
    pub const READ_WRITE: Self = Self {
        create: false,
        read: true,
        write: true,
        truncate: false,
    };

    /// Open read-write, creating the file when missing.
    pub const CREATE_READ_WRITE: Self = Self {
        create: true,
        read: true,
        write: true,
        truncate: false,
    };

    pub(crate) fn to_open_options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        opts.read(self.read)
            .write(self.write)
            .create(self.create)
            .truncate(self.truncate);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o775);
        }
        opts
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::CREATE_READ_WRITE
    }
}

/// Builder for [`MappedRegion`].
///
/// # Examples
///
/// ```no_run
/// use mapped_region::{FlushPolicy, MappedRegion, OpenFlags, Protection};
///
/// let region = MappedRegion::options()
///     .flags(OpenFlags::CREATE_READ_WRITE)
///     .size(64 * 1024)
///     .protection(Protection::READ_WRITE)
///     .flush_policy(FlushPolicy::EveryWrites(16))
///     .open("journal.dat")?;
/// # Ok::<(), mapped_region::MmapError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RegionOptions {
    pub(crate) flags: OpenFlags,
    pub(crate) size: Option<u64>,
    pub(crate) offset: u64,
    pub(crate) protection: Protection,
    pub(crate) advisory_lock: bool,
    pub(crate) flush_policy: FlushPolicy,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionOptions {
    /// Defaults: create read-write, read/write protection, size taken from the
    /// file, offset zero, advisory lock on, manual flushing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: OpenFlags::default(),
            size: None,
            offset: 0,
            protection: Protection::READ_WRITE,
            advisory_lock: true,
            flush_policy: FlushPolicy::Manual,
        }
    }

    /// Set how the backing file is opened.
    #[must_use]
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Requested mapping length; rounded up to the page size. When unset the
    /// current file length is used.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// File offset of the first mapped byte; need not be page aligned.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Requested protection.
    #[must_use]
    pub fn protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }

    /// Whether to take a shared, non-blocking advisory lock on the file.
    #[must_use]
    pub fn advisory_lock(mut self, enabled: bool) -> Self {
        self.advisory_lock = enabled;
        self
    }

    /// Automatic flush behaviour after writes.
    #[must_use]
    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Open (or create), size, map and lock `path` with the platform backend.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Io` if opening, truncating or mapping fails and
    /// `MmapError::LockFailed` if the advisory lock is refused. Nothing stays
    /// mapped on failure.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<MappedRegion> {
        self.open_in::<Native>(path.as_ref())
    }

    pub(crate) fn open_in<B: Backend>(&self, path: &Path) -> Result<MappedRegion<B>> {
        let file = self.flags.to_open_options().open(path)?;
        let len = self.prepare(&file)?;
        MappedRegion::<B>::establish(
            file,
            Some(path.to_path_buf()),
            self.offset,
            len,
            self.protection,
            self.advisory_lock,
            self.flush_policy,
        )
    }

    /// Size the backing file and return the page-rounded mapping length.
    fn prepare(&self, file: &File) -> Result<u64> {
        let file_len = file.metadata()?.len();
        let requested = match self.size {
            Some(size) => size,
            None => file_len.saturating_sub(self.offset),
        };
        if requested == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, ERR_ZERO_SIZE).into());
        }
        let overflow = || -> MmapError {
            io::Error::new(io::ErrorKind::InvalidInput, ERR_SIZE_OVERFLOW).into()
        };
        let len = round_up_to_page_size(requested).ok_or_else(overflow)?;
        let end = self.offset.checked_add(len).ok_or_else(overflow)?;

        if self.flags.write {
            // An explicit size at offset zero owns the whole file; otherwise only grow it.
            let exact = self.size.is_some() && self.offset == 0;
            if exact || file_len < end {
                file.set_len(end)?;
            }
        } else {
            ensure_file_covers(file_len, end)?;
        }
        Ok(len)
    }
}

/// Check that a file of `file_len` bytes backs every page of a mapping ending at `end`.
///
/// Bytes past EOF inside the final page read as zero; whole pages past it fault.
pub(crate) fn ensure_file_covers(file_len: u64, end: u64) -> Result<()> {
    let covered = align_up(file_len, page_size() as u64)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, ERR_SIZE_OVERFLOW))?;
    if covered < end {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "file is shorter than the requested mapping",
        )
        .into());
    }
    Ok(())
}
