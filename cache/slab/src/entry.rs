//! Stored entry records and the slot arena holding them.

use std::ops::{Index, IndexMut};

use crate::block::BlockRef;

/// Null entry index.
pub(crate) const NIL: u32 = u32::MAX;

const KEY_LEN_BITS: u32 = 11;
const KEY_LEN_MASK: u64 = (1 << KEY_LEN_BITS) - 1;

/// One cached key/value pair.
///
/// The key bytes live in a slab block sized to the key; the value is a
/// counted block chain shared with in-flight responses.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    /// Next entry in the bucket chain, or the next free slot.
    pub chain: u32,
    pub hash: u64,
    pub cas: u64,
    pub flags: u32,
    /// Absolute unix deadline, 0 for never.
    pub expires: u32,
    /// Key length in the low 11 bits, value length above.
    sizes: u64,
    pub key: Option<BlockRef>,
    pub value: Option<BlockRef>,
    pub lru_prev: u32,
    pub lru_next: u32,
    /// Flush generation the entry was created in.
    pub generation: u32,
}

impl Entry {
    pub fn new(hash: u64, key: BlockRef, key_len: usize, generation: u32) -> Self {
        debug_assert!(key_len as u64 <= KEY_LEN_MASK);
        Self {
            chain: NIL,
            hash,
            cas: 0,
            flags: 0,
            expires: 0,
            sizes: key_len as u64 & KEY_LEN_MASK,
            key: Some(key),
            value: None,
            lru_prev: NIL,
            lru_next: NIL,
            generation,
        }
    }

    #[inline]
    pub fn key_len(&self) -> usize {
        (self.sizes & KEY_LEN_MASK) as usize
    }

    #[inline]
    pub fn value_len(&self) -> usize {
        (self.sizes >> KEY_LEN_BITS) as usize
    }

    #[inline]
    pub fn set_value_len(&mut self, len: usize) {
        self.sizes = (self.sizes & KEY_LEN_MASK) | ((len as u64) << KEY_LEN_BITS);
    }

    /// Bytes counted against the cache's current size.
    #[inline]
    pub fn stored_bytes(&self) -> usize {
        self.key_len() + self.value_len()
    }

    fn vacant(next_free: u32) -> Self {
        Self {
            chain: next_free,
            hash: 0,
            cas: 0,
            flags: 0,
            expires: 0,
            sizes: 0,
            key: None,
            value: None,
            lru_prev: NIL,
            lru_next: NIL,
            generation: 0,
        }
    }
}

/// Slot arena of entries addressed by `u32` index.
///
/// Vacant slots are threaded through `chain` so removal and insertion are
/// O(1) and indices stay stable for the lifetime of an entry.
#[derive(Debug)]
pub(crate) struct EntryTable {
    slots: Vec<Entry>,
    free_head: u32,
    live: usize,
}

impl EntryTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: NIL,
            live: 0,
        }
    }

    /// Store an entry, returning its index.
    pub fn insert(&mut self, entry: Entry) -> u32 {
        self.live += 1;
        if self.free_head != NIL {
            let id = self.free_head;
            self.free_head = self.slots[id as usize].chain;
            self.slots[id as usize] = entry;
            id
        } else {
            let id = self.slots.len() as u32;
            debug_assert!(id < NIL - 1, "entry index space exhausted");
            self.slots.push(entry);
            id
        }
    }

    /// Vacate a slot, returning the entry it held.
    pub fn remove(&mut self, id: u32) -> Entry {
        let entry = std::mem::replace(&mut self.slots[id as usize], Entry::vacant(self.free_head));
        debug_assert!(entry.key.is_some(), "removing a vacant entry");
        self.free_head = id;
        self.live -= 1;
        entry
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }
}

impl Index<u32> for EntryTable {
    type Output = Entry;

    #[inline]
    fn index(&self, id: u32) -> &Entry {
        &self.slots[id as usize]
    }
}

impl IndexMut<u32> for EntryTable {
    #[inline]
    fn index_mut(&mut self, id: u32) -> &mut Entry {
        &mut self.slots[id as usize]
    }
}
