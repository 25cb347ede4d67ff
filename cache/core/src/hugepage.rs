//! Hugepage allocation support for large memory regions.
//!
//! This module provides an mmap-based [`MemoryProvider`] with hugepage
//! support for Linux. On non-Linux platforms, falls back to regular mmap.

use std::ptr::NonNull;

use crate::provider::{MemoryProvider, RawRegion};

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Hugepage size preference for large allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HugepageSize {
    /// No explicit hugepages, use regular 4KB pages.
    /// The OS may still use THP if configured system-wide.
    #[default]
    None,
    /// 2MB hugepages (MAP_HUGETLB | MAP_HUGE_2MB).
    /// Falls back to regular pages (with THP hint) if unavailable.
    TwoMegabyte,
    /// 1GB hugepages (MAP_HUGETLB | MAP_HUGE_1GB).
    /// Falls back directly to regular pages (with THP hint) if unavailable.
    OneGigabyte,
}

/// The actual page size used for an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatedPageSize {
    /// 1GB hugepages were used.
    OneGigabyte,
    /// 2MB hugepages were used.
    TwoMegabyte,
    /// Regular 4KB pages (possibly with THP).
    Regular,
}

impl std::fmt::Display for AllocatedPageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocatedPageSize::OneGigabyte => write!(f, "1GB hugepages"),
            AllocatedPageSize::TwoMegabyte => write!(f, "2MB hugepages"),
            AllocatedPageSize::Regular => write!(f, "4KB pages"),
        }
    }
}

/// Memory provider backed by anonymous mmap.
///
/// Regions are pre-faulted so the first write into a fresh region does not
/// stall on page faults while the cache lock is held.
#[derive(Debug, Clone, Copy, Default)]
pub struct MmapProvider {
    hugepage_size: HugepageSize,
}

impl MmapProvider {
    /// Create a provider with the given hugepage preference.
    pub fn new(hugepage_size: HugepageSize) -> Self {
        Self { hugepage_size }
    }

    /// The configured hugepage preference.
    pub fn hugepage_size(&self) -> HugepageSize {
        self.hugepage_size
    }
}

impl MemoryProvider for MmapProvider {
    fn allocate(&self, bytes: usize) -> std::io::Result<RawRegion> {
        if bytes == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot allocate zero bytes",
            ));
        }

        let (ptr, len, page_size) = match self.hugepage_size {
            HugepageSize::OneGigabyte => allocate_prefer_1gb(bytes),
            HugepageSize::TwoMegabyte => allocate_prefer_2mb(bytes),
            HugepageSize::None => allocate_regular(bytes),
        }?;

        tracing::debug!(
            size = %format_bytes(len),
            pages = %page_size,
            "mapped memory region"
        );

        // SAFETY: mmap returned `len` writable bytes that stay mapped until munmap
        Ok(unsafe { RawRegion::from_raw_parts(ptr, len) })
    }

    fn free(&self, region: RawRegion) -> bool {
        // SAFETY: region was produced by mmap in `allocate` with this length
        let result =
            unsafe { libc::munmap(region.as_ptr() as *mut libc::c_void, region.len()) };
        result == 0
    }

    fn page_size(&self) -> usize {
        match self.hugepage_size {
            HugepageSize::None => 4 * KB,
            HugepageSize::TwoMegabyte => 2 * MB,
            HugepageSize::OneGigabyte => GB,
        }
    }
}

type Mapping = (NonNull<u8>, usize, AllocatedPageSize);

/// Round up to the nearest multiple of `align`.
#[inline]
fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: usize) -> String {
    if bytes >= GB && bytes % GB == 0 {
        format!("{} GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Try to allocate with 1GB pages, falling back directly to regular pages.
fn allocate_prefer_1gb(size: usize) -> std::io::Result<Mapping> {
    // Only use 1GB pages if the waste is reasonable (< 50%)
    let rounded_1gb = round_up(size, GB);
    let waste_1gb = rounded_1gb - size;

    if size >= GB && waste_1gb * 2 <= rounded_1gb {
        match try_mmap_hugepage(rounded_1gb, GB) {
            Ok(ptr) => return Ok((ptr, rounded_1gb, AllocatedPageSize::OneGigabyte)),
            Err(e) => {
                tracing::warn!(error = %e, "1GB hugepage allocation failed, falling back to regular pages");
            }
        }
    }

    allocate_regular_internal(round_up(size, 2 * MB))
}

/// Try to allocate with 2MB pages, falling back to regular.
fn allocate_prefer_2mb(size: usize) -> std::io::Result<Mapping> {
    let rounded_2mb = round_up(size, 2 * MB);

    match try_mmap_hugepage(rounded_2mb, 2 * MB) {
        Ok(ptr) => return Ok((ptr, rounded_2mb, AllocatedPageSize::TwoMegabyte)),
        Err(e) => {
            tracing::warn!(error = %e, "2MB hugepage allocation failed, falling back to regular pages");
        }
    }

    // Still use 2MB size for THP friendliness
    allocate_regular_internal(rounded_2mb)
}

/// Allocate with regular pages (may still benefit from THP).
fn allocate_regular(size: usize) -> std::io::Result<Mapping> {
    allocate_regular_internal(round_up(size, 4 * KB))
}

fn allocate_regular_internal(alloc_size: usize) -> std::io::Result<Mapping> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            alloc_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }

    // Best-effort THP hint (MADV_HUGEPAGE = 14)
    #[cfg(target_os = "linux")]
    unsafe {
        let _ = libc::madvise(ptr, alloc_size, 14);
    }

    prefault(ptr as *mut u8, alloc_size, 4 * KB);

    // SAFETY: mmap did not return MAP_FAILED, so the pointer is non-null
    let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
    Ok((ptr, alloc_size, AllocatedPageSize::Regular))
}

/// Try to allocate memory using explicit hugepages.
#[cfg(target_os = "linux")]
fn try_mmap_hugepage(size: usize, page_size: usize) -> std::io::Result<NonNull<u8>> {
    const MAP_HUGETLB: libc::c_int = 0x40000;
    const MAP_HUGE_SHIFT: libc::c_int = 26;

    let huge_flag = if page_size == GB {
        MAP_HUGETLB | (30 << MAP_HUGE_SHIFT)
    } else if page_size == 2 * MB {
        MAP_HUGETLB | (21 << MAP_HUGE_SHIFT)
    } else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "unsupported hugepage size",
        ));
    };

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | huge_flag,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }

    prefault(ptr as *mut u8, size, page_size);

    // SAFETY: mmap did not return MAP_FAILED
    Ok(unsafe { NonNull::new_unchecked(ptr as *mut u8) })
}

#[cfg(not(target_os = "linux"))]
fn try_mmap_hugepage(_size: usize, _page_size: usize) -> std::io::Result<NonNull<u8>> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "hugepages not supported on this platform",
    ))
}

/// Touch each page so the OS backs the mapping with physical memory now.
fn prefault(ptr: *mut u8, size: usize, page_size: usize) {
    unsafe {
        for offset in (0..size).step_by(page_size) {
            std::ptr::write_volatile(ptr.add(offset), 0);
        }
    }
}
