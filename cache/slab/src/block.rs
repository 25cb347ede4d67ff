//! Block addressing and the shared block header word.
//!
//! Every block carved from a region starts with an 8-byte header:
//!
//! ```text
//! +----------------+------------------------------------------------+
//! |     63..48     |                     47..0                      |
//! |   ref count    |      link (next free block / next in chain)    |
//! +----------------+------------------------------------------------+
//! ```
//!
//! While a block sits on a free list the link points at the next free
//! block. While it holds value bytes the link chains big blocks together
//! and the count tracks how many owners (the entry plus in-flight
//! responses) share it.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::config::BLOCK_HEADER_SIZE;

const LINK_MASK: u64 = (1 << 48) - 1;
const REF_SHIFT: u32 = 48;
const REF_ONE: u64 = 1 << REF_SHIFT;

/// Address of a block: region index and byte offset, packed in 48 bits.
///
/// ```text
/// +----------------+--------------------------------+
/// |     47..32     |              31..0             |
/// |  region + 1    |             offset             |
/// +----------------+--------------------------------+
/// ```
///
/// The region field is biased by one so a valid reference is never zero
/// and zero can mean "no block" in a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRef(u64);

impl BlockRef {
    /// Create a reference to `offset` within region `region`.
    #[inline]
    pub fn new(region: usize, offset: usize) -> Self {
        debug_assert!(region < u16::MAX as usize);
        debug_assert!(offset <= u32::MAX as usize);
        Self((((region as u64) + 1) << 32) | offset as u64)
    }

    /// Decode a packed link. Zero decodes to `None`.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        let raw = raw & LINK_MASK;
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// The packed 48-bit representation.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Region index.
    #[inline]
    pub fn region(self) -> usize {
        ((self.0 >> 32) - 1) as usize
    }

    /// Byte offset within the region.
    #[inline]
    pub fn offset(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }
}

/// Table of region base pointers.
///
/// The table has a fixed number of slots so it can be read without the
/// cache lock. A slot is written once, under the lock, when its region is
/// mapped, and cleared only when the cache is dropped.
pub(crate) struct Arena {
    regions: Box<[AtomicPtr<u8>]>,
}

impl Arena {
    pub fn new(max_regions: usize) -> Self {
        Self {
            regions: (0..max_regions)
                .map(|_| AtomicPtr::new(std::ptr::null_mut()))
                .collect(),
        }
    }

    /// Number of region slots.
    pub fn capacity(&self) -> usize {
        self.regions.len()
    }

    /// Publish the base pointer of region `index`.
    pub fn publish(&self, index: usize, base: *mut u8) {
        self.regions[index].store(base, Ordering::Release);
    }

    /// Pointer to the first byte of `block` (its header).
    #[inline]
    pub fn ptr(&self, block: BlockRef) -> *mut u8 {
        let base = self.regions[block.region()].load(Ordering::Acquire);
        debug_assert!(!base.is_null());
        // SAFETY: offsets are only ever produced by carving inside the region
        unsafe { base.add(block.offset()) }
    }

    /// Pointer to the payload of `block`.
    #[inline]
    pub fn payload(&self, block: BlockRef) -> *mut u8 {
        // SAFETY: every block is larger than its header
        unsafe { self.ptr(block).add(BLOCK_HEADER_SIZE) }
    }

    #[inline]
    fn header(&self, block: BlockRef) -> &AtomicU64 {
        // SAFETY: block starts are 8-byte aligned within page-aligned
        // regions, and the header word is only accessed atomically
        unsafe { &*(self.ptr(block) as *const AtomicU64) }
    }

    /// Read the link field.
    #[inline]
    pub fn link(&self, block: BlockRef) -> Option<BlockRef> {
        BlockRef::from_raw(self.header(block).load(Ordering::Acquire))
    }

    /// Overwrite the header with a link and reference count.
    ///
    /// Only valid while the caller exclusively owns the block.
    #[inline]
    pub fn init(&self, block: BlockRef, link: Option<BlockRef>, refs: u16) {
        let link = link.map_or(0, BlockRef::raw);
        self.header(block)
            .store(((refs as u64) << REF_SHIFT) | link, Ordering::Release);
    }

    /// Current reference count.
    #[inline]
    pub fn refs(&self, block: BlockRef) -> u16 {
        (self.header(block).load(Ordering::Acquire) >> REF_SHIFT) as u16
    }

    /// Add a reference to `block`.
    #[inline]
    pub fn acquire(&self, block: BlockRef) {
        let prev = self.header(block).fetch_add(REF_ONE, Ordering::Relaxed);
        debug_assert!(prev >> REF_SHIFT < u16::MAX as u64, "block reference overflow");
    }

    /// Drop a reference to `block`, returning the remaining count.
    #[inline]
    pub fn release(&self, block: BlockRef) -> u16 {
        let prev = self.header(block).fetch_sub(REF_ONE, Ordering::AcqRel);
        debug_assert!(prev >> REF_SHIFT > 0, "block reference underflow");
        ((prev >> REF_SHIFT) - 1) as u16
    }

    /// Take a reference on every block of a value chain.
    pub fn acquire_chain(&self, head: BlockRef) {
        let mut cur = Some(head);
        while let Some(block) = cur {
            self.acquire(block);
            cur = self.link(block);
        }
    }

    /// Drop one reference on every block of a value chain.
    ///
    /// Blocks after the head are released first and the head last, so the
    /// party that takes the head to zero knows every other owner has
    /// finished walking the chain. Returns `true` for that party, which must
    /// then return the chain to the free lists.
    pub fn release_chain(&self, head: BlockRef) -> bool {
        let mut cur = self.link(head);
        while let Some(block) = cur {
            cur = self.link(block);
            self.release(block);
        }
        self.release(head) == 0
    }

    /// Borrow `len` payload bytes of `block`.
    ///
    /// # Safety
    ///
    /// The caller must hold a reference on the block and `len` must not
    /// exceed its payload capacity.
    #[inline]
    pub unsafe fn bytes(&self, block: BlockRef, len: usize) -> &[u8] {
        // SAFETY: upheld by the caller
        unsafe { std::slice::from_raw_parts(self.payload(block), len) }
    }

    /// Copy `src` into the payload of `block` at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must be the only owner of the block and the write must
    /// stay within its payload capacity.
    #[inline]
    pub unsafe fn write(&self, block: BlockRef, offset: usize, src: &[u8]) {
        // SAFETY: upheld by the caller
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.payload(block).add(offset),
                src.len(),
            );
        }
    }

    /// Read the `index`th 8-byte word of a block's payload.
    ///
    /// # Safety
    ///
    /// Caller must hold the cache lock and the block must be a sub-table.
    #[inline]
    pub unsafe fn word(&self, block: BlockRef, index: usize) -> u64 {
        // SAFETY: upheld by the caller; payloads are 8-byte aligned
        unsafe { std::ptr::read((self.payload(block) as *const u64).add(index)) }
    }

    /// Write the `index`th 8-byte word of a block's payload.
    ///
    /// # Safety
    ///
    /// Caller must hold the cache lock and the block must be a sub-table.
    #[inline]
    pub unsafe fn set_word(&self, block: BlockRef, index: usize, value: u64) {
        // SAFETY: upheld by the caller; payloads are 8-byte aligned
        unsafe { std::ptr::write((self.payload(block) as *mut u64).add(index), value) }
    }
}
