//! Utility helpers for page size, alignment, and safe range calculations.

use std::sync::OnceLock;

use crate::errors::{MmapError, Result};

/// Get the system page size in bytes.
#[must_use]
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "windows")] {
                windows_system_info().0
            } else {
                unix_page_size()
            }
        }
    })
}

/// Granularity that native mapping offsets must be aligned to.
///
/// This is the page size on Unix. Windows requires view offsets to be
/// multiples of the allocation granularity, which is usually 64 KiB.
#[must_use]
pub fn allocation_granularity() -> u64 {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "windows")] {
            windows_system_info().1 as u64
        } else {
            page_size() as u64
        }
    }
}

/// Returns `(page size, allocation granularity)`.
#[cfg(target_os = "windows")]
fn windows_system_info() -> (usize, usize) {
    use std::mem::MaybeUninit;
    #[allow(non_snake_case)]
    #[repr(C)]
    struct SYSTEM_INFO {
        wProcessorArchitecture: u16,
        wReserved: u16,
        dwPageSize: u32,
        lpMinimumApplicationAddress: *mut core::ffi::c_void,
        lpMaximumApplicationAddress: *mut core::ffi::c_void,
        dwActiveProcessorMask: usize,
        dwNumberOfProcessors: u32,
        dwProcessorType: u32,
        dwAllocationGranularity: u32,
        wProcessorLevel: u16,
        wProcessorRevision: u16,
    }
    extern "system" {
        fn GetSystemInfo(lpSystemInfo: *mut SYSTEM_INFO);
    }
    let mut sysinfo = MaybeUninit::<SYSTEM_INFO>::uninit();
    // SAFETY: GetSystemInfo fully initializes the struct it is given.
    unsafe {
        GetSystemInfo(sysinfo.as_mut_ptr());
        let s = sysinfo.assume_init();
        (s.dwPageSize as usize, s.dwAllocationGranularity as usize)
    }
}

#[cfg(not(target_os = "windows"))]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unix_page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE is safe to call.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    // sysconf reports -1 only for unsupported names
    if page_size <= 0 {
        4096
    } else {
        page_size as usize
    }
}

/// Align a value up to the nearest multiple of `alignment`.
///
/// Returns `None` when the aligned value does not fit in a `u64`.
#[must_use]
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    if alignment == 0 {
        return Some(value);
    }
    // Fast path for power-of-2 alignments (common case for page sizes)
    if alignment.is_power_of_two() {
        let mask = alignment - 1;
        value.checked_add(mask).map(|v| v & !mask)
    } else {
        value.div_ceil(alignment).checked_mul(alignment)
    }
}

/// Align a value down to the nearest multiple of `alignment`.
#[must_use]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value - value % alignment
}

/// Smallest multiple of the host page size that is `>= n`.
///
/// Used before every truncation and mapping so that the backing file and the
/// mapped view agree on length. Returns `None` on overflow.
#[must_use]
pub fn round_up_to_page_size(n: u64) -> Option<u64> {
    align_up(n, page_size() as u64)
}

/// Round a file offset down to the boundary native mapping calls accept.
#[must_use]
pub fn page_aligned_offset(offset: u64) -> u64 {
    align_down(offset, allocation_granularity())
}

/// Ensure the requested [offset, offset+len) range is within [0, total).
/// Returns `Ok(())` if valid; otherwise an `OutOfBounds` error.
///
/// # Errors
///
/// Returns `MmapError::OutOfBounds` if the range exceeds bounds or overflows.
pub fn ensure_in_bounds(offset: u64, len: u64, total: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= total => Ok(()),
        _ => Err(MmapError::OutOfBounds { offset, len, total }),
    }
}

/// Compute a safe byte slice range for a given total length, returning start..end as usize tuple.
///
/// # Errors
///
/// Returns `MmapError::OutOfBounds` if the requested range exceeds the total length.
pub fn slice_range(offset: u64, len: u64, total: u64) -> Result<(usize, usize)> {
    ensure_in_bounds(offset, len, total)?;
    let oob = || MmapError::OutOfBounds { offset, len, total };
    let start = usize::try_from(offset).map_err(|_| oob())?;
    let end = usize::try_from(offset + len).map_err(|_| oob())?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert!(allocation_granularity() >= page_size() as u64);
    }

    #[test]
    fn align_up_handles_edges() {
        assert_eq!(align_up(0, 4096), Some(0));
        assert_eq!(align_up(1, 4096), Some(4096));
        assert_eq!(align_up(4096, 4096), Some(4096));
        assert_eq!(align_up(4097, 4096), Some(8192));
        assert_eq!(align_up(10, 3), Some(12));
        assert_eq!(align_up(7, 0), Some(7));
        assert_eq!(align_up(u64::MAX, 4096), None);
    }

    #[test]
    fn align_down_handles_edges() {
        assert_eq!(align_down(0, 4096), 0);
        assert_eq!(align_down(4095, 4096), 0);
        assert_eq!(align_down(4096, 4096), 4096);
        assert_eq!(align_down(10, 3), 9);
    }

    #[test]
    fn page_aligned_offset_is_multiple_of_granularity() {
        let g = allocation_granularity();
        assert_eq!(page_aligned_offset(g + 17), g);
        assert_eq!(page_aligned_offset(g - 1), 0);
    }

    #[test]
    fn bounds_detect_overflow() {
        assert!(ensure_in_bounds(0, 4096, 4096).is_ok());
        assert!(ensure_in_bounds(4096, 0, 4096).is_ok());
        assert!(ensure_in_bounds(4089, 8, 4096).is_err());
        assert!(matches!(
            ensure_in_bounds(u64::MAX, 2, 4096),
            Err(MmapError::OutOfBounds { offset: u64::MAX, len: 2, total: 4096 })
        ));
        assert_eq!(slice_range(8, 8, 64).ok(), Some((8, 16)));
    }
}
