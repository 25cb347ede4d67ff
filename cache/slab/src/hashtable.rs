//! Splitting hash table.
//!
//! The top level is a power-of-two array of bucket words. A bucket holds a
//! short chain of entries threaded through [`Entry::chain`]; once a chain
//! grows past the threshold for its depth the bucket is replaced by a
//! 16-way sub-table indexed by the next four hash bits above the ones
//! already consumed. Depth is capped, so worst-case lookups stay bounded.
//!
//! Bucket word layout:
//!
//! ```text
//! chain:  | 63: 0 | 62..48: unused | 47..32: count | 31..0: head id + 1 |
//! split:  | 63: 1 | 62..48: unused |       47..0: sub-table block       |
//! ```
//!
//! [`Entry::chain`]: crate::entry::Entry

use crate::block::{Arena, BlockRef};
use crate::config::{SUBTABLE_FANOUT, SlabCacheConfig};
use crate::entry::{EntryTable, NIL};

const SPLIT: u64 = 1 << 63;
const COUNT_SHIFT: u32 = 32;
const COUNT_MAX: u16 = 32767;

/// A decoded bucket word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bucket(u64);

impl Bucket {
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub fn chain(head: u32, count: u16) -> Self {
        let head = if head == NIL { 0 } else { head as u64 + 1 };
        Self(((count.min(COUNT_MAX) as u64) << COUNT_SHIFT) | head)
    }

    #[inline]
    pub fn split(table: BlockRef) -> Self {
        Self(SPLIT | table.raw())
    }

    #[inline]
    pub fn is_split(self) -> bool {
        self.0 & SPLIT != 0
    }

    #[inline]
    pub fn table(self) -> Option<BlockRef> {
        if self.is_split() {
            BlockRef::from_raw(self.0)
        } else {
            None
        }
    }

    #[inline]
    pub fn head(self) -> u32 {
        match self.0 as u32 {
            0 => NIL,
            n => n - 1,
        }
    }

    #[inline]
    pub fn count(self) -> u16 {
        ((self.0 >> COUNT_SHIFT) & 0xffff) as u16
    }
}

/// Where a bucket word lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Top(usize),
    Sub(BlockRef, usize),
}

/// The hash table proper. Entries themselves live in the [`EntryTable`].
pub(crate) struct Hashtable {
    top: Vec<u64>,
    bits: u32,
    mask: u64,
    split_threshold: u16,
    split_growth: u16,
    max_depth: u8,
    subtables: usize,
}

impl Hashtable {
    pub fn new(config: &SlabCacheConfig) -> Self {
        let buckets = config.buckets();
        Self {
            top: vec![0; buckets],
            bits: buckets.trailing_zeros(),
            mask: buckets as u64 - 1,
            split_threshold: config.split_threshold.max(1),
            split_growth: config.split_growth,
            max_depth: config.split_depth(),
            subtables: 0,
        }
    }

    /// Number of sub-tables created by splits.
    pub fn subtables(&self) -> usize {
        self.subtables
    }

    #[inline]
    fn nibble(&self, hash: u64, depth: u8) -> usize {
        ((hash >> (self.bits + 4 * depth as u32)) & 0xf) as usize
    }

    /// Descend to the chain bucket for `hash`, returning it with its depth.
    pub fn locate(&self, arena: &Arena, hash: u64) -> (Slot, u8) {
        let mut slot = Slot::Top((hash & self.mask) as usize);
        let mut depth = 0;
        while let Some(table) = self.read(arena, slot).table() {
            slot = Slot::Sub(table, self.nibble(hash, depth));
            depth += 1;
        }
        (slot, depth)
    }

    #[inline]
    pub fn read(&self, arena: &Arena, slot: Slot) -> Bucket {
        match slot {
            Slot::Top(index) => Bucket(self.top[index]),
            // SAFETY: sub-table blocks are only touched under the cache lock
            Slot::Sub(table, index) => Bucket(unsafe { arena.word(table, index) }),
        }
    }

    #[inline]
    fn write(&mut self, arena: &Arena, slot: Slot, bucket: Bucket) {
        match slot {
            Slot::Top(index) => self.top[index] = bucket.0,
            // SAFETY: sub-table blocks are only touched under the cache lock
            Slot::Sub(table, index) => unsafe { arena.set_word(table, index, bucket.0) },
        }
    }

    /// First entry of the chain at `slot`, or [`NIL`].
    #[inline]
    pub fn head(&self, arena: &Arena, slot: Slot) -> u32 {
        self.read(arena, slot).head()
    }

    /// Push an entry onto the front of a chain. Returns the new count.
    pub fn push(&mut self, arena: &Arena, entries: &mut EntryTable, slot: Slot, id: u32) -> u16 {
        let bucket = self.read(arena, slot);
        entries[id].chain = bucket.head();
        let count = bucket.count().saturating_add(1);
        self.write(arena, slot, Bucket::chain(id, count));
        count
    }

    /// Unlink `id` from the chain at `slot`, given its predecessor.
    pub fn unlink(&mut self, arena: &Arena, entries: &mut EntryTable, slot: Slot, prev: u32, id: u32) {
        let next = entries[id].chain;
        let bucket = self.read(arena, slot);
        let count = bucket.count().saturating_sub(1);
        if prev == NIL {
            self.write(arena, slot, Bucket::chain(next, count));
        } else {
            entries[prev].chain = next;
            self.write(arena, slot, Bucket::chain(bucket.head(), count));
        }
        entries[id].chain = NIL;
    }

    /// Find and unlink `id` from whichever chain holds it.
    pub fn remove(&mut self, arena: &Arena, entries: &mut EntryTable, id: u32) -> bool {
        let (slot, _) = self.locate(arena, entries[id].hash);
        let mut prev = NIL;
        let mut cur = self.head(arena, slot);
        while cur != NIL {
            if cur == id {
                self.unlink(arena, entries, slot, prev, id);
                return true;
            }
            prev = cur;
            cur = entries[cur].chain;
        }
        false
    }

    /// Returns `true` if a chain of `count` entries at `depth` should split.
    #[inline]
    pub fn needs_split(&self, count: u16, depth: u8) -> bool {
        depth < self.max_depth
            && count > self.split_threshold + self.split_growth.saturating_mul(depth as u16)
    }

    /// Replace the chain at `slot` with a sub-table stored in `table`,
    /// redistributing its entries by the next hash nibble.
    pub fn split(
        &mut self,
        arena: &Arena,
        entries: &mut EntryTable,
        slot: Slot,
        depth: u8,
        table: BlockRef,
    ) {
        for index in 0..SUBTABLE_FANOUT {
            // SAFETY: the block was just allocated for this sub-table
            unsafe { arena.set_word(table, index, Bucket::EMPTY.0) };
        }

        let mut cur = self.head(arena, slot);
        let mut moved = 0;
        while cur != NIL {
            let next = entries[cur].chain;
            let child = Slot::Sub(table, self.nibble(entries[cur].hash, depth));
            self.push(arena, entries, child, cur);
            cur = next;
            moved += 1;
        }

        self.write(arena, slot, Bucket::split(table));
        self.subtables += 1;
        tracing::trace!(depth, entries = moved, "split hash bucket");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    #[test]
    fn test_bucket_encoding() {
        assert_eq!(Bucket::EMPTY.head(), NIL);
        assert_eq!(Bucket::EMPTY.count(), 0);
        assert!(!Bucket::EMPTY.is_split());

        let bucket = Bucket::chain(0, 1);
        assert_eq!(bucket.head(), 0);
        assert_eq!(bucket.count(), 1);

        let bucket = Bucket::chain(NIL - 1, u16::MAX);
        assert_eq!(bucket.head(), NIL - 1);
        assert_eq!(bucket.count(), COUNT_MAX);

        let table = BlockRef::new(3, 136);
        let bucket = Bucket::split(table);
        assert!(bucket.is_split());
        assert_eq!(bucket.table(), Some(table));
    }

    fn setup(backing: &mut Vec<u64>) -> (Arena, Hashtable, EntryTable) {
        let arena = Arena::new(1);
        arena.publish(0, backing.as_mut_ptr() as *mut u8);
        let config = SlabCacheConfig {
            bucket_count: 16,
            ..Default::default()
        };
        (arena, Hashtable::new(&config), EntryTable::new())
    }

    fn insert(arena: &Arena, table: &mut Hashtable, entries: &mut EntryTable, hash: u64) -> u32 {
        let id = entries.insert(Entry::new(hash, BlockRef::new(0, 0), 1, 0));
        let (slot, _) = table.locate(arena, hash);
        table.push(arena, entries, slot, id);
        id
    }

    #[test]
    fn test_push_and_remove() {
        let mut backing = vec![0u64; 128];
        let (arena, mut table, mut entries) = setup(&mut backing);

        let a = insert(&arena, &mut table, &mut entries, 0x10);
        let b = insert(&arena, &mut table, &mut entries, 0x20);
        let c = insert(&arena, &mut table, &mut entries, 0x30);

        let (slot, depth) = table.locate(&arena, 0x10);
        assert_eq!(slot, Slot::Top(0));
        assert_eq!(depth, 0);
        assert_eq!(table.read(&arena, slot).count(), 3);
        assert_eq!(table.head(&arena, slot), c);

        assert!(table.remove(&arena, &mut entries, b));
        assert_eq!(entries[c].chain, a);
        assert!(table.remove(&arena, &mut entries, c));
        assert_eq!(table.head(&arena, slot), a);
        assert_eq!(table.read(&arena, slot).count(), 1);
        assert!(!table.remove(&arena, &mut entries, c));
    }

    #[test]
    fn test_needs_split_thresholds() {
        let mut backing = vec![0u64; 128];
        let (_arena, table, _entries) = setup(&mut backing);
        assert!(!table.needs_split(8, 0));
        assert!(table.needs_split(9, 0));
        assert!(!table.needs_split(10, 1));
        assert!(table.needs_split(11, 1));
        assert!(!table.needs_split(100, 3));
    }

    #[test]
    fn test_split_redistributes_by_nibble() {
        let mut backing = vec![0u64; 128];
        let (arena, mut table, mut entries) = setup(&mut backing);

        // 16 top buckets consume 4 bits; the next nibble selects the child
        let ids: Vec<u32> = (0..9u64)
            .map(|i| insert(&arena, &mut table, &mut entries, (i << 4) | 0x3))
            .collect();

        let (slot, depth) = table.locate(&arena, 0x3);
        assert!(table.needs_split(table.read(&arena, slot).count(), depth));

        let sub = BlockRef::new(0, 256);
        table.split(&arena, &mut entries, slot, depth, sub);
        assert_eq!(table.subtables(), 1);

        for (i, &id) in ids.iter().enumerate() {
            let hash = ((i as u64) << 4) | 0x3;
            let (slot, depth) = table.locate(&arena, hash);
            assert_eq!(depth, 1);
            assert_eq!(slot, Slot::Sub(sub, i));
            assert_eq!(table.head(&arena, slot), id);
            assert_eq!(table.read(&arena, slot).count(), 1);
        }

        assert!(table.remove(&arena, &mut entries, ids[4]));
        let (slot, _) = table.locate(&arena, 0x43);
        assert_eq!(table.head(&arena, slot), NIL);
    }
}
