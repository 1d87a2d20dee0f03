//! Windows backend: `CreateFileMappingW` + `MapViewOfFile`, `FlushViewOfFile`.
//!
//! Windows offers no advisory file-locking primitive matching `flock`, so
//! `lock`/`unlock` succeed without doing anything.

use std::ffi::c_void;
use std::fs::File;
use std::io;
use std::mem::{self, MaybeUninit};
use std::os::windows::io::AsRawHandle;
use std::ptr::{self, NonNull};

use super::{native_extent, Backend, RawView};
use crate::errors::Result;
use crate::protection::Protection;
use crate::utils::allocation_granularity;

const PAGE_READONLY: u32 = 0x02;
const PAGE_READWRITE: u32 = 0x04;
const PAGE_WRITECOPY: u32 = 0x08;

const FILE_MAP_COPY: u32 = 0x0001;
const FILE_MAP_WRITE: u32 = 0x0002;
const FILE_MAP_READ: u32 = 0x0004;
const FILE_MAP_EXECUTE: u32 = 0x0020;

const ERROR_INVALID_PARAMETER: i32 = 87;

const MEM_MAPPED: u32 = 0x0004_0000;

#[allow(non_snake_case)]
#[repr(C)]
struct MEMORY_BASIC_INFORMATION {
    BaseAddress: *mut c_void,
    AllocationBase: *mut c_void,
    AllocationProtect: u32,
    #[cfg(target_pointer_width = "64")]
    PartitionId: u16,
    RegionSize: usize,
    State: u32,
    Protect: u32,
    Type: u32,
}

#[allow(non_snake_case)]
extern "system" {
    fn CreateFileMappingW(
        hFile: *mut c_void,
        lpFileMappingAttributes: *mut c_void,
        flProtect: u32,
        dwMaximumSizeHigh: u32,
        dwMaximumSizeLow: u32,
        lpName: *const u16,
    ) -> *mut c_void;
    fn MapViewOfFile(
        hFileMappingObject: *mut c_void,
        dwDesiredAccess: u32,
        dwFileOffsetHigh: u32,
        dwFileOffsetLow: u32,
        dwNumberOfBytesToMap: usize,
    ) -> *mut c_void;
    fn UnmapViewOfFile(lpBaseAddress: *const c_void) -> i32;
    fn FlushViewOfFile(lpBaseAddress: *const c_void, dwNumberOfBytesToFlush: usize) -> i32;
    fn CloseHandle(hObject: *mut c_void) -> i32;
    fn VirtualQuery(
        lpAddress: *const c_void,
        lpBuffer: *mut MEMORY_BASIC_INFORMATION,
        dwLength: usize,
    ) -> usize;
}

/// `CreateFileMappingW` page protection and `MapViewOfFile` access arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowsFlags {
    /// `PAGE_*` protection for the file-mapping object.
    pub protect: u32,
    /// `FILE_MAP_*` access for the view.
    pub access: u32,
}

/// Backend for Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsBackend;

#[allow(clippy::cast_possible_truncation)]
fn split(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, (value & 0xFFFF_FFFF) as u32)
}

/// Whether `view` starts a file-backed view returned by `MapViewOfFile`.
fn is_mapped_view(view: &RawView) -> bool {
    let base = view.base().as_ptr();
    if view.native_len() == 0 || base as usize as u64 % allocation_granularity() != 0 {
        return false;
    }
    let mut info = MaybeUninit::<MEMORY_BASIC_INFORMATION>::uninit();
    let size = mem::size_of::<MEMORY_BASIC_INFORMATION>();
    // SAFETY: VirtualQuery only reads the address space and fills `info`.
    let written = unsafe { VirtualQuery(base.cast_const().cast(), info.as_mut_ptr(), size) };
    if written == 0 {
        return false;
    }
    // SAFETY: a non-zero return means the structure was filled in.
    let info = unsafe { info.assume_init() };
    info.AllocationBase == base.cast::<c_void>() && info.Type == MEM_MAPPED
}

impl Backend for WindowsBackend {
    type Flags = WindowsFlags;

    fn translate(protection: Protection) -> WindowsFlags {
        let mut protect = PAGE_READONLY;
        let mut access = FILE_MAP_READ;
        if protection.contains(Protection::WRITE) {
            protect = PAGE_READWRITE;
            access = FILE_MAP_WRITE;
        }
        if protection.contains(Protection::COPY) {
            protect = PAGE_WRITECOPY;
            access = FILE_MAP_COPY;
        }
        if protection.contains(Protection::EXEC) {
            // PAGE_EXECUTE_* sit four bits above their non-executable counterparts
            protect <<= 4;
            access |= FILE_MAP_EXECUTE;
        }
        WindowsFlags { protect, access }
    }

    fn map(file: &File, offset: u64, len: usize, protection: Protection) -> io::Result<RawView> {
        let (aligned, delta, native_len) = native_extent(offset, len)?;
        let WindowsFlags { protect, access } = Self::translate(protection);
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| io::Error::from_raw_os_error(ERROR_INVALID_PARAMETER))?;
        let (size_hi, size_lo) = split(end);
        let (off_hi, off_lo) = split(aligned);

        // SAFETY: the file handle is valid for the call; a null name creates an
        // anonymous mapping object.
        let handle = unsafe {
            CreateFileMappingW(
                file.as_raw_handle().cast(),
                ptr::null_mut(),
                protect,
                size_hi,
                size_lo,
                ptr::null(),
            )
        };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: handle is a live mapping object sized to cover the view.
        let addr = unsafe { MapViewOfFile(handle, access, off_hi, off_lo, native_len) };
        let map_err = if addr.is_null() {
            Some(io::Error::last_os_error())
        } else {
            None
        };

        // The view keeps the mapping object alive; the handle is no longer needed.
        // SAFETY: handle was returned by CreateFileMappingW above.
        let close_failed = unsafe { CloseHandle(handle) } == 0;

        if let Some(err) = map_err {
            return Err(err);
        }
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(ERROR_INVALID_PARAMETER))?;
        // SAFETY: MapViewOfFile returned `native_len` valid bytes at `base`.
        let view = unsafe { RawView::from_raw_parts(base, native_len, delta) };
        if close_failed {
            let err = io::Error::last_os_error();
            // SAFETY: the view was just created and is not shared yet.
            unsafe { UnmapViewOfFile(view.base().as_ptr().cast()) };
            return Err(err);
        }
        Ok(view)
    }

    unsafe fn unmap(view: &RawView) -> io::Result<()> {
        if !is_mapped_view(view) {
            return Err(io::Error::from_raw_os_error(ERROR_INVALID_PARAMETER));
        }
        if UnmapViewOfFile(view.base().as_ptr().cast()) == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn flush(view: &RawView) -> io::Result<()> {
        // SAFETY: base/native_len describe a live view.
        let ok = unsafe { FlushViewOfFile(view.base().as_ptr().cast(), view.native_len()) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn lock(_file: &File) -> Result<()> {
        Ok(())
    }

    fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_is_total() {
        for bits in 0u8..16 {
            let p = Protection::from_bits_truncate(bits);
            let WindowsFlags { protect, access } = WindowsBackend::translate(p);

            let base_protect = if p.contains(Protection::COPY) {
                PAGE_WRITECOPY
            } else if p.contains(Protection::WRITE) {
                PAGE_READWRITE
            } else {
                PAGE_READONLY
            };
            let expected = if p.contains(Protection::EXEC) {
                base_protect << 4
            } else {
                base_protect
            };
            assert_eq!(protect, expected, "protect for {p:?}");
            assert_eq!(
                access & FILE_MAP_EXECUTE != 0,
                p.contains(Protection::EXEC),
                "execute access for {p:?}"
            );
        }
    }

    #[test]
    fn unmap_rejects_memory_it_did_not_map() {
        let heap = Box::into_raw(vec![0u8; 4096].into_boxed_slice());
        let base = NonNull::new(heap.cast::<u8>()).expect("non-null");
        // SAFETY: the boxed slice stays alive until reclaimed below.
        let view = unsafe { RawView::from_raw_parts(base, 4096, 0) };
        // SAFETY: unmap must refuse the view without touching it.
        let err = unsafe { WindowsBackend::unmap(&view) }.expect_err("heap view");
        assert_eq!(err.raw_os_error(), Some(ERROR_INVALID_PARAMETER));
        // SAFETY: `heap` came from Box::into_raw and was not freed.
        drop(unsafe { Box::from_raw(heap) });
    }

    #[test]
    fn unmap_accepts_its_own_views() {
        let file = tempfile::tempfile().expect("tempfile");
        file.set_len(4096).expect("set_len");
        let view = WindowsBackend::map(&file, 0, 4096, Protection::READ_WRITE).expect("map");
        assert!(is_mapped_view(&view));
        // SAFETY: the view came from `map` and is unmapped once.
        unsafe { WindowsBackend::unmap(&view) }.expect("unmap");
    }

    #[test]
    fn locking_is_a_no_op() {
        let file = tempfile::tempfile().expect("tempfile");
        WindowsBackend::lock(&file).expect("lock");
        WindowsBackend::unlock(&file).expect("unlock");
    }
}
