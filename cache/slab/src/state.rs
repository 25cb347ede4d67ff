//! Cache state guarded by the cache lock.
//!
//! Everything here runs with the lock held: lookups, insertion, removal,
//! eviction and allocation. Eviction happens inside the same critical
//! section as the allocation that needed it.

use std::sync::Arc;

use cache_core::time::{expire_at, is_expired};
use cache_core::{CacheResult, MemoryProvider};
use protocol_memcache::Status;

use crate::allocator::{BlockKind, SlabAllocator};
use crate::block::{Arena, BlockRef};
use crate::config::{SlabCacheConfig, select_class};
use crate::entry::{Entry, EntryTable, NIL};
use crate::hashtable::Hashtable;
use crate::lru::Lru;
use crate::stats::{Stats, StatsSnapshot};
use crate::value::Shape;

/// Value storage detached from any handle, owned by whoever holds it.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RawValue {
    pub head: Option<BlockRef>,
    pub len: usize,
}

pub(crate) struct CacheState {
    pub arena: Arc<Arena>,
    pub allocator: SlabAllocator,
    pub entries: EntryTable,
    pub table: Hashtable,
    pub lru: Lru,
    pub stats: Stats,
    /// Cached unix time, advanced by clock ticks.
    pub now: u32,
    started: u32,
    generation: u32,
    cas: u64,
    pending_flush: Option<u32>,
    pub max_item_size: usize,
    memory_limit: usize,
}

impl CacheState {
    pub fn new(
        arena: Arc<Arena>,
        provider: Arc<dyn MemoryProvider>,
        config: &SlabCacheConfig,
        now: u32,
    ) -> CacheResult<Self> {
        let mut allocator = SlabAllocator::new(arena.clone(), provider, config)?;
        allocator.prewarm(config.prewarm_blocks)?;

        Ok(Self {
            arena,
            allocator,
            entries: EntryTable::new(),
            table: Hashtable::new(config),
            lru: Lru::new(),
            stats: Stats::new(now),
            now,
            started: now,
            generation: 0,
            cas: 0,
            pending_flush: None,
            max_item_size: config.max_item_size,
            memory_limit: config.memory_limit(),
        })
    }

    /// Next CAS value.
    pub fn next_cas(&mut self) -> u64 {
        self.cas += 1;
        self.cas
    }

    /// Returns `true` if an entry predates the last flush or has expired.
    pub fn is_stale(&self, id: u32) -> bool {
        let entry = &self.entries[id];
        entry.generation != self.generation || is_expired(entry.expires, self.now)
    }

    fn key_matches(&self, id: u32, key: &[u8]) -> bool {
        let entry = &self.entries[id];
        entry.key_len() == key.len()
            && entry.key.is_some_and(|block| {
                // SAFETY: the entry owns its key block
                unsafe { self.arena.bytes(block, key.len()) == key }
            })
    }

    /// Look up a live entry, moving it to the LRU head.
    ///
    /// Stale entries met along the chain are unlinked and freed.
    pub fn find(&mut self, hash: u64, key: &[u8]) -> Option<u32> {
        let (slot, _) = self.table.locate(&self.arena, hash);
        let mut prev = NIL;
        let mut cur = self.table.head(&self.arena, slot);

        while cur != NIL {
            let next = self.entries[cur].chain;
            if self.is_stale(cur) {
                self.table
                    .unlink(&self.arena, &mut self.entries, slot, prev, cur);
                self.free_entry(cur);
                self.stats.reclaimed += 1;
            } else if self.entries[cur].hash == hash && self.key_matches(cur, key) {
                self.lru.touch(&mut self.entries, cur);
                return Some(cur);
            } else {
                prev = cur;
            }
            cur = next;
        }

        None
    }

    /// Look up an entry, inserting an empty one on a miss.
    ///
    /// Returns the entry and whether it was just created.
    pub fn find_or_create(&mut self, hash: u64, key: &[u8]) -> Result<(u32, bool), Status> {
        if let Some(id) = self.find(hash, key) {
            return Ok((id, false));
        }

        let class_id = select_class(key.len()).ok_or(Status::InvalidArguments)?;
        let block = self
            .alloc_block(BlockKind::Class(class_id), NIL)
            .ok_or(Status::OutOfMemory)?;
        // SAFETY: the block was just allocated and is large enough for the key
        unsafe { self.arena.write(block, 0, key) };

        let id = self
            .entries
            .insert(Entry::new(hash, block, key.len(), self.generation));

        // eviction may have reshaped the chain, so locate after allocating
        let (slot, depth) = self.table.locate(&self.arena, hash);
        let count = self.table.push(&self.arena, &mut self.entries, slot, id);
        self.lru.push_head(&mut self.entries, id);
        self.stats.curr_items += 1;
        self.stats.curr_bytes += key.len() as u64;

        if self.table.needs_split(count, depth) {
            // splitting never evicts
            if let Some(table) = self.allocator.alloc(BlockKind::Bucket) {
                self.table
                    .split(&self.arena, &mut self.entries, slot, depth, table);
            }
        }

        Ok((id, true))
    }

    /// Unlink an entry from the table and free it.
    pub fn remove(&mut self, id: u32) {
        self.table.remove(&self.arena, &mut self.entries, id);
        self.free_entry(id);
    }

    /// Free an entry already unlinked from its bucket chain.
    fn free_entry(&mut self, id: u32) {
        self.lru.unlink(&mut self.entries, id);
        let entry = self.entries.remove(id);
        self.stats.curr_items = self.stats.curr_items.saturating_sub(1);
        self.stats.curr_bytes = self
            .stats
            .curr_bytes
            .saturating_sub(entry.stored_bytes() as u64);

        if let Some(value) = entry.value {
            self.release_value(value, entry.value_len());
        }
        if let (Some(key), Some(class_id)) = (entry.key, select_class(entry.key_len())) {
            self.allocator.free(key, BlockKind::Class(class_id));
        }
    }

    /// Drop one reference on a value, freeing it if it was the last.
    pub fn release_value(&mut self, head: BlockRef, len: usize) {
        if self.arena.release_chain(head) {
            self.allocator.free_value(head, len);
        }
    }

    /// Release detached storage.
    pub fn release_raw(&mut self, raw: RawValue) {
        if let Some(head) = raw.head {
            self.release_value(head, raw.len);
        }
    }

    /// Attach new value storage to an entry, releasing the previous one.
    pub fn set_value(&mut self, id: u32, raw: RawValue) {
        let entry = &mut self.entries[id];
        let old = entry.value.take();
        let old_len = entry.value_len();
        entry.value = raw.head;
        entry.set_value_len(raw.len);

        self.stats.curr_bytes = (self.stats.curr_bytes + raw.len as u64).saturating_sub(old_len as u64);
        if let Some(old) = old {
            self.release_value(old, old_len);
        }
    }

    /// Change the recorded length of a value mutated in place.
    pub fn resize_value(&mut self, id: u32, len: usize) {
        let old_len = self.entries[id].value_len();
        self.entries[id].set_value_len(len);
        self.stats.curr_bytes = (self.stats.curr_bytes + len as u64).saturating_sub(old_len as u64);
    }

    /// Allocate a block, evicting if needed. Never evicts `pinned`.
    pub fn alloc_block(&mut self, kind: BlockKind, pinned: u32) -> Option<BlockRef> {
        if let Some(block) = self.allocator.alloc(kind) {
            return Some(block);
        }
        if !self.evict_for(kind, pinned) {
            return None;
        }
        self.allocator.alloc(kind)
    }

    /// Allocate storage for a value of `len` bytes with one reference held.
    pub fn alloc_value(&mut self, len: usize, pinned: u32) -> Result<RawValue, Status> {
        let head = match Shape::of(len) {
            Shape::Empty => None,
            Shape::Class(class_id) => Some(
                self.alloc_block(BlockKind::Class(class_id), pinned)
                    .ok_or(Status::OutOfMemory)?,
            ),
            Shape::Big(count) => {
                let head = self
                    .alloc_block(BlockKind::Big, pinned)
                    .ok_or(Status::OutOfMemory)?;
                let mut tail = head;
                for _ in 1..count {
                    let Some(block) = self.alloc_block(BlockKind::Big, pinned) else {
                        self.allocator.free_value(head, len);
                        return Err(Status::OutOfMemory);
                    };
                    self.arena.init(tail, Some(block), 1);
                    tail = block;
                }
                Some(head)
            }
        };
        Ok(RawValue { head, len })
    }

    /// Evict from the LRU tail until a block of `kind` can be allocated.
    fn evict_for(&mut self, kind: BlockKind, pinned: u32) -> bool {
        let mut evicted = 0;
        while !self.allocator.can_allocate(kind, 1) {
            let Some(victim) = self.eviction_candidate(pinned) else {
                tracing::error!(
                    ?kind,
                    evicted,
                    limit = self.memory_limit,
                    "nothing left to evict; memory limit too small for this workload"
                );
                return false;
            };
            self.evict(victim);
            evicted += 1;
        }

        // an already expired tail entry goes too
        if let Some(victim) = self.eviction_candidate(pinned)
            && self.is_stale(victim)
        {
            self.evict(victim);
            evicted += 1;
        }

        if evicted > 0 {
            tracing::trace!(?kind, evicted, "evicted entries");
        }
        true
    }

    fn eviction_candidate(&self, pinned: u32) -> Option<u32> {
        let tail = self.lru.tail()?;
        if tail != pinned {
            return Some(tail);
        }
        self.lru.prev(&self.entries, tail)
    }

    fn evict(&mut self, id: u32) {
        if self.is_stale(id) {
            self.stats.reclaimed += 1;
        } else {
            self.stats.evictions += 1;
        }
        self.remove(id);
    }

    /// Invalidate every entry now, or schedule it `delay` seconds out.
    pub fn flush(&mut self, delay: u32) {
        if delay == 0 {
            self.flush_now();
        } else {
            self.pending_flush = Some(expire_at(delay, self.now));
        }
    }

    fn flush_now(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pending_flush = None;
        self.stats.reset(self.now);
        tracing::debug!(generation = self.generation, "flushed cache");
    }

    /// Advance the cached clock.
    pub fn tick(&mut self, now: u32) {
        self.now = now;
        self.stats.roll(now);
        if self.pending_flush.is_some_and(|at| at <= now) {
            self.flush_now();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pid: std::process::id(),
            uptime: self.now.saturating_sub(self.started),
            time: self.now,
            version: env!("CARGO_PKG_VERSION"),
            curr_items: self.stats.curr_items,
            bytes: self.stats.curr_bytes,
            limit_maxbytes: self.memory_limit as u64,
            get_hits: self.stats.hits,
            get_misses: self.stats.misses,
            evictions: self.stats.evictions,
            reclaimed: self.stats.reclaimed,
            updates: self.stats.updates,
            requests: self.stats.requests,
            bytes_read: self.stats.bytes_in,
            bytes_written: self.stats.bytes_out,
            requests_per_sec: self.stats.requests_per_sec(),
            bytes_per_sec: self.stats.bytes_per_sec(),
            regions: self.allocator.region_count() as u64,
            mapped_bytes: self.allocator.mapped_bytes() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_core::{HeapProvider, fnv1a_64};

    fn state(memory_limit_mb: usize) -> CacheState {
        let config = SlabCacheConfig {
            memory_limit_mb,
            region_size: 64 * 1024,
            bucket_count: 16,
            prewarm_blocks: 0,
            ..Default::default()
        };
        let arena = Arc::new(Arena::new(config.region_count()));
        CacheState::new(arena, Arc::new(HeapProvider::new()), &config, 1_000).unwrap()
    }

    fn insert(state: &mut CacheState, key: &[u8]) -> u32 {
        let (id, created) = state.find_or_create(fnv1a_64(key), key).unwrap();
        assert!(created);
        id
    }

    #[test]
    fn test_find_or_create_then_find() {
        let mut state = state(1);
        let id = insert(&mut state, b"abc");
        assert_eq!(state.find(fnv1a_64(b"abc"), b"abc"), Some(id));
        assert_eq!(state.find(fnv1a_64(b"abd"), b"abd"), None);
        assert_eq!(state.find_or_create(fnv1a_64(b"abc"), b"abc"), Ok((id, false)));
        assert_eq!(state.stats.curr_items, 1);
        assert_eq!(state.stats.curr_bytes, 3);
    }

    #[test]
    fn test_same_hash_different_key() {
        let mut state = state(1);
        let a = state.find_or_create(42, b"one").unwrap().0;
        let b = state.find_or_create(42, b"two").unwrap().0;
        assert_ne!(a, b);
        assert_eq!(state.find(42, b"one"), Some(a));
        assert_eq!(state.find(42, b"two"), Some(b));
    }

    #[test]
    fn test_expired_entries_reclaimed_lazily() {
        let mut state = state(1);
        let id = insert(&mut state, b"short");
        state.entries[id].expires = 1_010;
        state.tick(1_010);
        assert_eq!(state.find(fnv1a_64(b"short"), b"short"), None);
        assert_eq!(state.stats.reclaimed, 1);
        assert_eq!(state.entries.len(), 0);
        assert_eq!(state.stats.curr_items, 0);
    }

    #[test]
    fn test_flush_invalidates_by_generation() {
        let mut state = state(1);
        insert(&mut state, b"a");
        state.flush(0);
        assert_eq!(state.find(fnv1a_64(b"a"), b"a"), None);

        insert(&mut state, b"b");
        state.flush(5);
        state.tick(1_004);
        assert!(state.find(fnv1a_64(b"b"), b"b").is_some());
        state.tick(1_005);
        assert_eq!(state.find(fnv1a_64(b"b"), b"b"), None);
    }

    #[test]
    fn test_split_keeps_entries_reachable() {
        let mut state = state(1);
        let keys: Vec<Vec<u8>> = (0..200).map(|i| format!("key-{i}").into_bytes()).collect();
        let ids: Vec<u32> = keys.iter().map(|k| insert(&mut state, k)).collect();
        assert!(state.table.subtables() > 0);
        for (key, id) in keys.iter().zip(ids) {
            assert_eq!(state.find(fnv1a_64(key), key), Some(id));
        }
    }

    #[test]
    fn test_eviction_takes_lru_tail() {
        let mut state = state(1);
        insert(&mut state, b"first");
        let mut last = NIL;
        let mut i = 0;
        // fill memory with 1000 byte values until allocation needs eviction
        while state.stats.evictions == 0 {
            assert!(state.find(fnv1a_64(b"first"), b"first").is_some());
            let key = format!("k{i}");
            last = insert(&mut state, key.as_bytes());
            let raw = state.alloc_value(1000, last).unwrap();
            state.set_value(last, raw);
            i += 1;
        }
        assert!(state.find(fnv1a_64(b"first"), b"first").is_some());
        assert!(state.find(fnv1a_64(b"k0"), b"k0").is_none());
        assert!(state.entries[last].value.is_some());
    }

    #[test]
    fn test_eviction_candidate_skips_pinned() {
        let mut state = state(1);
        let a = insert(&mut state, b"a");
        let b = insert(&mut state, b"b");
        assert_eq!(state.eviction_candidate(NIL), Some(a));
        assert_eq!(state.eviction_candidate(a), Some(b));
    }

    #[test]
    fn test_alloc_value_big_chain() {
        let mut state = state(1);
        let raw = state.alloc_value(10_000, NIL).unwrap();
        let head = raw.head.unwrap();
        let mut blocks = 1;
        let mut cur = state.arena.link(head);
        while let Some(block) = cur {
            blocks += 1;
            cur = state.arena.link(block);
        }
        assert_eq!(blocks, 4);
        state.release_raw(raw);
        assert_eq!(state.allocator.free_count(BlockKind::Big), 4);
    }

    #[test]
    fn test_out_of_memory_when_nothing_to_evict() {
        let mut state = state(1);
        assert_eq!(
            state.alloc_value(2 * 1024 * 1024, NIL).err(),
            Some(Status::OutOfMemory)
        );
        // the partial chain went back to the free list
        assert!(state.allocator.free_count(BlockKind::Big) > 0);
    }
}
