//! Slab allocator carving regions into size-class free lists.
//!
//! The allocator lives inside the cache state and is only touched with the
//! cache lock held. Free blocks are threaded through their own header link,
//! so a free list is just a head reference and a length.
//!
//! When a free list is empty the allocator "chops" the current region: the
//! requested block is carved from the region's unused tail. If the tail is
//! too small, whatever remains is handed to the largest classes that fit
//! and the next region is opened, either from the reserved pool or freshly
//! mapped from the memory provider.

use std::sync::Arc;

use cache_core::{CacheResult, MemoryProvider, RawRegion};

use crate::block::{Arena, BlockRef};
use crate::config::{
    BIG_BLOCK_SIZE, BUCKET_BLOCK_SIZE, LAST_SLAB_PAYLOAD, SLAB_CLASSES, SlabCacheConfig,
    select_class,
};

/// The kind of block being requested or returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    /// A slab class block.
    Class(u8),
    /// A big block, used alone or chained for large values.
    Big,
    /// A bucket sub-table block.
    Bucket,
}

impl BlockKind {
    /// Total size of the block, including the header.
    pub fn size(self) -> usize {
        match self {
            Self::Class(class_id) => SLAB_CLASSES[class_id as usize],
            Self::Big => BIG_BLOCK_SIZE,
            Self::Bucket => BUCKET_BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FreeList {
    head: Option<BlockRef>,
    len: usize,
}

/// Unused tail of the region currently being carved.
#[derive(Debug, Clone, Copy)]
struct Carve {
    region: usize,
    offset: usize,
    len: usize,
}

impl Carve {
    fn remaining(&self) -> usize {
        self.len - self.offset
    }
}

/// Size-class allocator over provider-supplied regions.
pub(crate) struct SlabAllocator {
    arena: Arc<Arena>,
    provider: Arc<dyn MemoryProvider>,
    classes: [FreeList; SLAB_CLASSES.len()],
    big: FreeList,
    buckets: FreeList,
    /// Regions in use, indexed by region number.
    regions: Vec<RawRegion>,
    /// Regions mapped up front and not yet carved.
    reserved: Vec<RawRegion>,
    current: Option<Carve>,
    region_size: usize,
    max_regions: usize,
}

impl SlabAllocator {
    /// Create the allocator. With the reserve policy every region is mapped
    /// here; otherwise regions are mapped on demand.
    pub fn new(
        arena: Arc<Arena>,
        provider: Arc<dyn MemoryProvider>,
        config: &SlabCacheConfig,
    ) -> CacheResult<Self> {
        let region_size = config.effective_region_size();
        let max_regions = config.region_count().min(arena.capacity());

        let mut allocator = Self {
            arena,
            provider,
            classes: [FreeList::default(); SLAB_CLASSES.len()],
            big: FreeList::default(),
            buckets: FreeList::default(),
            regions: Vec::with_capacity(max_regions),
            reserved: Vec::new(),
            current: None,
            region_size,
            max_regions,
        };

        if config.reserve_memory {
            for _ in 0..max_regions {
                let region = allocator.provider.allocate(region_size)?;
                allocator.reserved.push(region);
            }
            // regions are taken from the back
            allocator.reserved.reverse();
        }

        Ok(allocator)
    }

    /// Open the first region and carve `count` blocks into every free list.
    ///
    /// Pre-warming only carves the first region; it never opens another one
    /// and never evicts.
    pub fn prewarm(&mut self, count: usize) -> CacheResult<()> {
        if self.current.is_none() && !self.open_region()? {
            return Err(cache_core::CacheError::OutOfMemory);
        }

        let kinds = (0..SLAB_CLASSES.len() as u8)
            .map(BlockKind::Class)
            .chain([BlockKind::Big, BlockKind::Bucket]);

        for kind in kinds {
            for _ in 0..count {
                match self.carve_current(kind) {
                    Some(block) => self.free(block, kind),
                    None => return Ok(()),
                }
            }
        }

        Ok(())
    }

    /// Allocate a block, chopping a region if the free list is empty.
    ///
    /// The block comes back with a reference count of one and no link.
    /// Returns `None` when no memory is left without evicting.
    pub fn alloc(&mut self, kind: BlockKind) -> Option<BlockRef> {
        let block = match self.pop(kind) {
            Some(block) => block,
            None => match self.carve(kind) {
                Some(block) => block,
                // a sub-table may borrow a big block
                None if kind == BlockKind::Bucket => self.pop(BlockKind::Big)?,
                None => return None,
            },
        };
        self.arena.init(block, None, 1);
        Some(block)
    }

    /// Return a block to its free list.
    pub fn free(&mut self, block: BlockRef, kind: BlockKind) {
        let list = self.list_mut(kind);
        let head = list.head;
        list.head = Some(block);
        list.len += 1;
        self.arena.init(block, head, 0);
    }

    /// Return every block of a value of `len` bytes to the free lists.
    pub fn free_value(&mut self, head: BlockRef, len: usize) {
        if len <= LAST_SLAB_PAYLOAD {
            if let Some(class_id) = select_class(len) {
                self.free(head, BlockKind::Class(class_id));
            }
            return;
        }

        let mut cur = Some(head);
        while let Some(block) = cur {
            cur = self.arena.link(block);
            self.free(block, BlockKind::Big);
        }
    }

    /// Number of blocks on a free list.
    pub fn free_count(&self, kind: BlockKind) -> usize {
        match kind {
            BlockKind::Class(class_id) => self.classes[class_id as usize].len,
            BlockKind::Big => self.big.len,
            BlockKind::Bucket => self.buckets.len,
        }
    }

    /// Returns `true` if `count` blocks of `kind` can be handed out without
    /// evicting.
    pub fn can_allocate(&self, kind: BlockKind, count: usize) -> bool {
        let free = self.free_count(kind);
        if free >= count {
            return true;
        }
        let carvable = self
            .current
            .map_or(0, |carve| carve.remaining() / kind.size());
        let fresh_regions = self.reserved.len() + (self.max_regions - self.regions.len());
        fresh_regions > 0 || free + carvable >= count
    }

    /// Number of regions in use.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Bytes of regions in use, counting only what is carved into blocks.
    pub fn mapped_bytes(&self) -> usize {
        self.regions.iter().map(|region| self.carve_len(region)).sum()
    }

    /// Providers may round regions up to their page size; only the
    /// configured region size is ever carved.
    fn carve_len(&self, region: &RawRegion) -> usize {
        region.len().min(self.region_size).min(u32::MAX as usize)
    }

    fn list_mut(&mut self, kind: BlockKind) -> &mut FreeList {
        match kind {
            BlockKind::Class(class_id) => &mut self.classes[class_id as usize],
            BlockKind::Big => &mut self.big,
            BlockKind::Bucket => &mut self.buckets,
        }
    }

    fn pop(&mut self, kind: BlockKind) -> Option<BlockRef> {
        let block = self.list_mut(kind).head?;
        let next = self.arena.link(block);
        let list = self.list_mut(kind);
        list.head = next;
        list.len -= 1;
        Some(block)
    }

    /// Carve a block, opening new regions as needed.
    fn carve(&mut self, kind: BlockKind) -> Option<BlockRef> {
        loop {
            if let Some(block) = self.carve_current(kind) {
                return Some(block);
            }
            self.spill();
            match self.open_region() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "memory provider refused a region");
                    return None;
                }
            }
        }
    }

    /// Carve a block from the current region only.
    fn carve_current(&mut self, kind: BlockKind) -> Option<BlockRef> {
        let size = kind.size();
        let carve = self.current.as_mut()?;
        if carve.remaining() < size {
            return None;
        }
        let block = BlockRef::new(carve.region, carve.offset);
        carve.offset += size;
        Some(block)
    }

    /// Push the unused tail of the current region into the largest classes
    /// that fit, so none of it is wasted.
    fn spill(&mut self) {
        let Some(mut carve) = self.current.take() else {
            return;
        };

        let mut spilled = 0;
        while let Some(class_id) = SLAB_CLASSES
            .iter()
            .rposition(|&size| size <= carve.remaining())
        {
            let block = BlockRef::new(carve.region, carve.offset);
            carve.offset += SLAB_CLASSES[class_id];
            self.free(block, BlockKind::Class(class_id as u8));
            spilled += 1;
        }

        if spilled > 0 {
            tracing::trace!(region = carve.region, blocks = spilled, "spilled region tail");
        }
    }

    /// Make the next region current. Returns `false` at the memory limit.
    fn open_region(&mut self) -> CacheResult<bool> {
        let region = match self.reserved.pop() {
            Some(region) => region,
            None if self.regions.len() < self.max_regions => {
                self.provider.allocate(self.region_size)?
            }
            None => return Ok(false),
        };

        let index = self.regions.len();
        let len = self.carve_len(&region);
        self.arena.publish(index, region.as_ptr());
        self.regions.push(region);
        self.current = Some(Carve {
            region: index,
            offset: 0,
            len,
        });

        tracing::debug!(region = index, bytes = len, "opened region");
        Ok(true)
    }
}

impl Drop for SlabAllocator {
    fn drop(&mut self) {
        for region in self.regions.drain(..).chain(self.reserved.drain(..)) {
            if !self.provider.free(region) {
                tracing::warn!("memory provider failed to release a region");
            }
        }
    }
}
