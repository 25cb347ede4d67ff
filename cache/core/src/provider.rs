//! Raw memory provider abstraction.
//!
//! The cache never allocates item memory through the global allocator on the
//! hot path. Instead it asks a [`MemoryProvider`] for large page-aligned
//! regions and carves them up itself.

use std::alloc::Layout;
use std::ptr::NonNull;

/// A contiguous region of memory handed out by a [`MemoryProvider`].
///
/// The region does not free itself on drop; it must be handed back to the
/// provider that produced it.
#[derive(Debug)]
pub struct RawRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl RawRegion {
    /// Wrap a pointer and length.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes of writable memory that stays valid
    /// until the region is returned to its provider.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Pointer to the start of the region.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the region has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// Safety: a region is plain memory with no thread affinity.
unsafe impl Send for RawRegion {}
unsafe impl Sync for RawRegion {}

/// Source of large page-aligned memory regions.
pub trait MemoryProvider: Send + Sync {
    /// Allocate at least `bytes` bytes. The returned region may be larger
    /// because of page rounding.
    fn allocate(&self, bytes: usize) -> std::io::Result<RawRegion>;

    /// Return a region to the provider. Returns `false` if the provider
    /// could not release it.
    fn free(&self, region: RawRegion) -> bool;

    /// The page size regions are aligned to.
    fn page_size(&self) -> usize;
}

/// Provider backed by the global allocator.
///
/// Useful on platforms without mmap and in tests that want many small
/// caches without touching the page tables.
#[derive(Debug, Clone, Copy)]
pub struct HeapProvider {
    page_size: usize,
}

impl HeapProvider {
    /// Create a provider aligning regions to 4KB.
    pub fn new() -> Self {
        Self { page_size: 4096 }
    }

    fn layout(&self, bytes: usize) -> std::io::Result<Layout> {
        let rounded = bytes.div_ceil(self.page_size) * self.page_size;
        Layout::from_size_align(rounded, self.page_size)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    }
}

impl Default for HeapProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider for HeapProvider {
    fn allocate(&self, bytes: usize) -> std::io::Result<RawRegion> {
        if bytes == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot allocate zero bytes",
            ));
        }
        let layout = self.layout(bytes)?;
        // SAFETY: layout has a nonzero size
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::OutOfMemory, "heap allocation failed")
        })?;
        Ok(RawRegion {
            ptr,
            len: layout.size(),
        })
    }

    fn free(&self, region: RawRegion) -> bool {
        match Layout::from_size_align(region.len, self.page_size) {
            Ok(layout) => {
                // SAFETY: the region was produced by `allocate` with this layout
                unsafe { std::alloc::dealloc(region.as_ptr(), layout) };
                true
            }
            Err(_) => false,
        }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
