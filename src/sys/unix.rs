//! POSIX backend: `mmap`, `msync(MS_SYNC)`, `munmap` and `flock`.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr::{self, NonNull};

use libc::c_int;

use super::{native_extent, Backend, RawView};
use crate::errors::{MmapError, Result};
use crate::protection::Protection;

/// `mmap` protection and mapping-type arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosixFlags {
    /// `PROT_*` bits.
    pub prot: c_int,
    /// `MAP_SHARED` or `MAP_PRIVATE`.
    pub flags: c_int,
}

/// Backend for Unix-like systems.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixBackend;

impl Backend for PosixBackend {
    type Flags = PosixFlags;

    fn translate(protection: Protection) -> PosixFlags {
        let mut prot = libc::PROT_READ;
        let mut flags = libc::MAP_SHARED;
        if protection.contains(Protection::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if protection.contains(Protection::COPY) {
            // private pages must be writable for copy-on-write to mean anything
            prot |= libc::PROT_WRITE;
            flags = libc::MAP_PRIVATE;
        }
        if protection.contains(Protection::EXEC) {
            prot |= libc::PROT_EXEC;
        }
        PosixFlags { prot, flags }
    }

    fn map(file: &File, offset: u64, len: usize, protection: Protection) -> io::Result<RawView> {
        let (aligned, delta, native_len) = native_extent(offset, len)?;
        let native_offset = libc::off_t::try_from(aligned)
            .map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))?;
        let PosixFlags { prot, flags } = Self::translate(protection);

        // SAFETY: a fresh mapping at a kernel-chosen address; the descriptor
        // stays open for the duration of the call.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                native_len,
                prot,
                flags,
                file.as_raw_fd(),
                native_offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        // SAFETY: mmap returned `native_len` valid bytes at `base`.
        Ok(unsafe { RawView::from_raw_parts(base, native_len, delta) })
    }

    unsafe fn unmap(view: &RawView) -> io::Result<()> {
        if libc::munmap(view.base().as_ptr().cast(), view.native_len()) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn flush(view: &RawView) -> io::Result<()> {
        // SAFETY: base is the page-aligned start of a live mapping of native_len bytes.
        let rc = unsafe {
            libc::msync(
                view.base().as_ptr().cast(),
                view.native_len(),
                libc::MS_SYNC,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn lock(file: &File) -> Result<()> {
        // SAFETY: flock on an open descriptor has no memory-safety requirements.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
        if rc != 0 {
            return Err(MmapError::LockFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: as above.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::page_size;

    #[test]
    fn translate_is_total() {
        for bits in 0u8..16 {
            let p = Protection::from_bits_truncate(bits);
            let PosixFlags { prot, flags } = PosixBackend::translate(p);

            assert_ne!(prot & libc::PROT_READ, 0, "read always granted for {p:?}");
            assert_eq!(
                prot & libc::PROT_EXEC != 0,
                p.contains(Protection::EXEC),
                "exec for {p:?}"
            );
            assert_eq!(
                prot & libc::PROT_WRITE != 0,
                p.is_writable(),
                "write for {p:?}"
            );
            let expected = if p.contains(Protection::COPY) {
                libc::MAP_PRIVATE
            } else {
                libc::MAP_SHARED
            };
            assert_eq!(flags, expected, "mapping type for {p:?}");
        }
    }

    #[test]
    fn map_flush_unmap_roundtrip() {
        let file = tempfile::tempfile().expect("tempfile");
        let ps = page_size();
        file.set_len(ps as u64 * 2).expect("set_len");

        let view = PosixBackend::map(&file, ps as u64 + 3, 10, Protection::READ_WRITE)
            .expect("map");
        assert_eq!(view.delta(), 3);
        assert_eq!(view.len(), 10);
        assert_eq!(view.base().as_ptr() as usize % ps, 0);

        // SAFETY: single-threaded test with exclusive access.
        unsafe { view.as_mut_slice().copy_from_slice(b"0123456789") };
        PosixBackend::flush(&view).expect("flush");
        // SAFETY: the view is not used afterwards.
        unsafe { PosixBackend::unmap(&view).expect("unmap") };

        let mut buf = [0u8; 10];
        std::os::unix::fs::FileExt::read_exact_at(&file, &mut buf, ps as u64 + 3)
            .expect("pread");
        assert_eq!(&buf, b"0123456789");
    }

    #[test]
    fn shared_locks_coexist_but_exclusive_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("locked.dat");
        let a = File::create(&path).expect("create");
        let b = File::open(&path).expect("open");

        PosixBackend::lock(&a).expect("first shared lock");
        PosixBackend::lock(&b).expect("second shared lock");

        let c = File::open(&path).expect("open");
        // SAFETY: plain flock call on a valid descriptor.
        let rc = unsafe { libc::flock(c.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_ne!(rc, 0, "exclusive lock must not be granted alongside shared holders");

        PosixBackend::unlock(&a).expect("unlock a");
        PosixBackend::unlock(&b).expect("unlock b");
    }
}
