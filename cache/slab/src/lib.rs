//! Memcached-compatible slab cache engine.
//!
//! Keys and values live in blocks carved from large regions obtained from a
//! [`MemoryProvider`]. Small values take one block from a fixed size class;
//! larger values are chains of big blocks. Entries are found through a
//! bucketed hashtable whose overloaded chains split into 16-way sub-tables,
//! and are evicted from a global LRU list when an allocation cannot be
//! satisfied within the memory limit.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------+
//! |                 SlabCache                   |
//! |                                             |
//! |  Mutex<CacheState>                          |
//! |  +---------------------------------------+  |
//! |  | Hashtable     bucket -> entry chain   |  |
//! |  |               (split into sub-tables) |  |
//! |  | EntryTable    cas/flags/expiry/links  |  |
//! |  | Lru           global recency list     |  |
//! |  | SlabAllocator class + big free lists  |  |
//! |  +---------------------------------------+  |
//! |                                             |
//! |  Arena (region table, read without lock)    |
//! |  - block headers: link + reference count    |
//! +---------------------------------------------+
//! ```
//!
//! Requests are executed in batches: one lock acquisition per [`Batch`].
//! Retrievals hand out [`ValueRef`]s holding a reference on the value's
//! blocks, so responses are written to the network after the lock is
//! released and stay valid even if the entry is overwritten meanwhile.
//!
//! # Example
//!
//! ```
//! use slab_cache::{SlabCache, Status};
//!
//! let cache = SlabCache::builder()
//!     .memory_limit_mb(4)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(cache.set(b"greeting", b"hello", 0, 0), Status::NoError);
//! assert_eq!(cache.get_text(b"greeting").as_deref(), Some("hello"));
//! ```

#![warn(clippy::all)]

mod allocator;
mod block;
mod config;
mod entry;
mod execute;
mod hashtable;
mod lru;
mod request;
mod state;
mod stats;
mod value;

use std::fmt;
use std::sync::Arc;

use cache_core::{CacheResult, MemoryProvider, MmapProvider};
use parking_lot::Mutex;

pub use cache_core::HugepageSize;
pub use config::{
    BIG_BLOCK_PAYLOAD, BIG_BLOCK_SIZE, DEFAULT_BUCKET_COUNT, DEFAULT_MAX_BATCH_BYTES,
    DEFAULT_MAX_ITEM_SIZE, DEFAULT_MEMORY_LIMIT_MB, DEFAULT_PREWARM_BLOCKS, DEFAULT_REGION_SIZE,
    LAST_SLAB_PAYLOAD, MAX_MEMORY_LIMIT_MB, SLAB_CLASSES, SlabCacheConfig, big_block_count,
    select_class,
};
pub use protocol_memcache::{Extras, MAX_KEY_LEN, Opcode, Status};
pub use request::{Batch, Body, Request, RequestHead, Response};
pub use stats::{StatValue, StatsSnapshot};
pub use value::{Chunks, ValueBuf, ValueRef};

use block::{Arena, BlockRef};
use entry::NIL;
use state::CacheState;

/// Shared cache internals.
pub(crate) struct Inner {
    pub(crate) arena: Arc<Arena>,
    pub(crate) state: Mutex<CacheState>,
    config: SlabCacheConfig,
    provider: Arc<dyn MemoryProvider>,
}

impl Inner {
    fn new(config: SlabCacheConfig, provider: Arc<dyn MemoryProvider>) -> CacheResult<Self> {
        let arena = Arc::new(Arena::new(config.region_count()));
        let state = CacheState::new(
            arena.clone(),
            provider.clone(),
            &config,
            cache_core::time::now_unix_secs(),
        )?;
        Ok(Self {
            arena,
            state: Mutex::new(state),
            config,
            provider,
        })
    }

    /// Drop a handle's reference on a value chain outside the lock.
    ///
    /// Only the party releasing the last reference takes the lock, to put
    /// the blocks back on the free lists.
    pub(crate) fn release_value(&self, head: BlockRef, len: usize) {
        if self.arena.release_chain(head) {
            self.state.lock().allocator.free_value(head, len);
        }
    }
}

/// A slab cache handle. Clones share the same cache.
#[derive(Clone)]
pub struct SlabCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for SlabCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabCache")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl SlabCache {
    /// Create a new builder for SlabCache.
    pub fn builder() -> SlabCacheBuilder {
        SlabCacheBuilder::new()
    }

    /// The configuration the cache was built with.
    pub fn config(&self) -> &SlabCacheConfig {
        &self.inner.config
    }

    /// Batch size limit for connections feeding this cache.
    pub fn max_batch_bytes(&self) -> usize {
        self.inner.config.max_batch_bytes
    }

    /// Execute all requests in `batch` under one lock acquisition.
    ///
    /// Responses left from a previous execution are dropped first.
    pub fn execute(&self, batch: &mut Batch) {
        // releasing old values may need the lock
        batch.responses.clear();
        let mut state = self.inner.state.lock();
        state.execute(batch, &self.inner);
    }

    /// Allocate storage for a value of `len` bytes, to be filled by the
    /// caller and attached to a request.
    pub fn allocate_value(&self, len: usize) -> Result<ValueBuf, Status> {
        if len > self.inner.config.max_item_size {
            return Err(Status::ValueTooLarge);
        }
        let raw = self.inner.state.lock().alloc_value(len, NIL)?;
        Ok(ValueBuf::new(self.inner.clone(), raw.head, raw.len))
    }

    /// Copy `bytes` into freshly allocated value storage.
    pub fn value_from(&self, bytes: &[u8]) -> Result<ValueBuf, Status> {
        let mut value = self.allocate_value(bytes.len())?;
        value.fill(bytes);
        Ok(value)
    }

    fn run(&self, head: RequestHead, key: &[u8], value: Option<ValueBuf>) -> Response {
        let mut batch = Batch::new(usize::MAX);
        batch.push(head, key, value);
        self.execute(&mut batch);
        batch
            .responses
            .pop()
            .unwrap_or_else(|| Response::new(&head, Default::default(), Status::InvalidArguments))
    }

    fn store(&self, opcode: Opcode, key: &[u8], value: &[u8], flags: u32, expiration: u32) -> Status {
        let value = match self.value_from(value) {
            Ok(value) => value,
            Err(status) => return status,
        };
        let head = RequestHead::new(opcode).extras(Extras::Storage { flags, expiration });
        self.run(head, key, Some(value)).status
    }

    /// Store a value unconditionally.
    pub fn set(&self, key: &[u8], value: &[u8], flags: u32, expiration: u32) -> Status {
        self.store(Opcode::Set, key, value, flags, expiration)
    }

    /// Store a value only if the key is not present.
    pub fn add(&self, key: &[u8], value: &[u8], flags: u32, expiration: u32) -> Status {
        self.store(Opcode::Add, key, value, flags, expiration)
    }

    /// Store a value only if the key is present.
    pub fn replace(&self, key: &[u8], value: &[u8], flags: u32, expiration: u32) -> Status {
        self.store(Opcode::Replace, key, value, flags, expiration)
    }

    fn concat(&self, opcode: Opcode, key: &[u8], value: &[u8]) -> Status {
        match self.value_from(value) {
            Ok(value) => self.run(RequestHead::new(opcode), key, Some(value)).status,
            Err(status) => status,
        }
    }

    /// Append to a value, creating it if missing.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Status {
        self.concat(Opcode::Append, key, value)
    }

    /// Prepend to a value, creating it if missing.
    pub fn prepend(&self, key: &[u8], value: &[u8]) -> Status {
        self.concat(Opcode::Prepend, key, value)
    }

    /// Look up a value.
    pub fn get(&self, key: &[u8]) -> Option<ValueRef> {
        match self.run(RequestHead::new(Opcode::Get), key, None).body {
            Body::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Look up a value and decode it as (lossy) UTF-8.
    pub fn get_text(&self, key: &[u8]) -> Option<String> {
        self.get(key)
            .map(|value| String::from_utf8_lossy(&value.to_vec()).into_owned())
    }

    /// Remove a key.
    pub fn delete(&self, key: &[u8]) -> Status {
        self.run(RequestHead::new(Opcode::Delete), key, None).status
    }

    /// Update a key's expiration.
    pub fn touch(&self, key: &[u8], expiration: u32) -> Status {
        let head = RequestHead::new(Opcode::Touch).extras(Extras::Expiration(expiration));
        self.run(head, key, None).status
    }

    fn counter(
        &self,
        opcode: Opcode,
        key: &[u8],
        delta: u64,
        initial: u64,
        expiration: u32,
    ) -> Result<u64, Status> {
        let head = RequestHead::new(opcode).extras(Extras::Counter {
            delta,
            initial,
            expiration,
        });
        let response = self.run(head, key, None);
        match response.body {
            Body::Counter(value) => Ok(value),
            _ => Err(response.status),
        }
    }

    /// Increment a decimal counter, wrapping on overflow.
    pub fn increment(&self, key: &[u8], delta: u64, initial: u64, expiration: u32) -> Result<u64, Status> {
        self.counter(Opcode::Increment, key, delta, initial, expiration)
    }

    /// Decrement a decimal counter, stopping at zero.
    pub fn decrement(&self, key: &[u8], delta: u64, initial: u64, expiration: u32) -> Result<u64, Status> {
        self.counter(Opcode::Decrement, key, delta, initial, expiration)
    }

    /// Invalidate every entry, now or `delay` seconds from now.
    pub fn flush(&self, delay: u32) {
        self.inner.state.lock().flush(delay);
    }

    /// Current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Number of physically stored entries, including ones not yet
    /// reclaimed after expiry or a flush.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance the cache clock to the current time.
    pub fn tick(&self) {
        self.tick_at(cache_core::time::now_unix_secs());
    }

    /// Advance the cache clock to `now` (unix seconds).
    pub fn tick_at(&self, now: u32) {
        self.inner.state.lock().tick(now);
    }

    /// Cached time of the last clock tick.
    pub fn now(&self) -> u32 {
        self.inner.state.lock().now
    }

    /// Drop every entry and all memory, starting over with the same
    /// configuration.
    ///
    /// Other handles cloned from this one keep the old cache.
    pub fn reset(&mut self) -> CacheResult<()> {
        let inner = Inner::new(self.inner.config.clone(), self.inner.provider.clone())?;
        self.inner = Arc::new(inner);
        Ok(())
    }
}

/// Builder for [`SlabCache`].
#[derive(Default)]
pub struct SlabCacheBuilder {
    config: SlabCacheConfig,
    provider: Option<Arc<dyn MemoryProvider>>,
}

impl SlabCacheBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: SlabCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the memory limit in megabytes.
    pub fn memory_limit_mb(mut self, mb: usize) -> Self {
        self.config.memory_limit_mb = mb;
        self
    }

    /// Set the number of top-level hash buckets (rounded to a power of two).
    pub fn bucket_count(mut self, buckets: usize) -> Self {
        self.config.bucket_count = buckets;
        self
    }

    /// Set the hugepage size preference.
    pub fn hugepage_size(mut self, size: HugepageSize) -> Self {
        self.config.hugepage_size = size;
        self
    }

    /// Map every region up front instead of on demand.
    pub fn reserve_memory(mut self, reserve: bool) -> Self {
        self.config.reserve_memory = reserve;
        self
    }

    /// Set the region size in bytes.
    pub fn region_size(mut self, bytes: usize) -> Self {
        self.config.region_size = bytes;
        self
    }

    /// Set how many blocks of each kind are carved at startup.
    pub fn prewarm_blocks(mut self, count: usize) -> Self {
        self.config.prewarm_blocks = count;
        self
    }

    /// Set the chain length at which a top-level bucket splits.
    pub fn split_threshold(mut self, threshold: u16) -> Self {
        self.config.split_threshold = threshold;
        self
    }

    /// Set how much the split threshold grows per sub-table level.
    pub fn split_growth(mut self, growth: u16) -> Self {
        self.config.split_growth = growth;
        self
    }

    /// Set the maximum sub-table depth.
    pub fn max_split_depth(mut self, depth: u8) -> Self {
        self.config.max_split_depth = depth;
        self
    }

    /// Set the largest value accepted, in bytes.
    pub fn max_item_size(mut self, bytes: usize) -> Self {
        self.config.max_item_size = bytes;
        self
    }

    /// Set the per-batch arena limit for connections.
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.max_batch_bytes = bytes;
        self
    }

    /// Use a specific memory provider instead of anonymous mmap.
    pub fn provider(mut self, provider: impl MemoryProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Build the cache, mapping its first region and pre-warming the free
    /// lists.
    pub fn build(self) -> CacheResult<SlabCache> {
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(MmapProvider::new(self.config.hugepage_size)));
        let inner = Inner::new(self.config, provider)?;

        tracing::debug!(
            memory_limit = inner.config.memory_limit(),
            buckets = inner.config.buckets(),
            regions = inner.config.region_count(),
            region_size = inner.config.effective_region_size(),
            "slab cache ready"
        );

        Ok(SlabCache {
            inner: Arc::new(inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_core::HeapProvider;

    fn cache() -> SlabCache {
        SlabCache::builder()
            .memory_limit_mb(2)
            .provider(HeapProvider::new())
            .build()
            .unwrap()
    }

    #[test]
    fn test_set_get_delete() {
        let cache = cache();
        assert_eq!(cache.set(b"key", b"value", 7, 0), Status::NoError);
        let value = cache.get(b"key").unwrap();
        assert!(value == *b"value".as_slice());
        assert_eq!(cache.delete(b"key"), Status::NoError);
        assert!(cache.get(b"key").is_none());
        assert_eq!(cache.delete(b"key"), Status::KeyNotFound);
    }

    #[test]
    fn test_value_survives_overwrite_and_delete() {
        let cache = cache();
        cache.set(b"k", b"first", 0, 0);
        let held = cache.get(b"k").unwrap();
        cache.set(b"k", b"second", 0, 0);
        cache.delete(b"k");
        assert_eq!(held.to_vec(), b"first");
    }

    fn big_free(cache: &SlabCache) -> usize {
        cache
            .inner
            .state
            .lock()
            .allocator
            .free_count(allocator::BlockKind::Big)
    }

    #[test]
    fn test_released_value_returns_blocks() {
        let cache = cache();
        cache.set(b"k", &[b'x'; 5000], 0, 0);
        let held = cache.get(b"k").unwrap();
        cache.delete(b"k");
        let free = big_free(&cache);
        drop(held);
        assert_eq!(big_free(&cache), free + 2);
    }

    #[test]
    fn test_unfilled_value_buf_released_on_drop() {
        let cache = cache();
        let before = big_free(&cache);
        let buf = cache.allocate_value(4000).unwrap();
        assert_eq!(big_free(&cache), before - 2);
        drop(buf);
        assert_eq!(big_free(&cache), before);
    }

    #[test]
    fn test_allocate_value_too_large() {
        let cache = SlabCache::builder()
            .memory_limit_mb(2)
            .max_item_size(1000)
            .provider(HeapProvider::new())
            .build()
            .unwrap();
        assert_eq!(cache.allocate_value(1001).err(), Some(Status::ValueTooLarge));
        assert!(cache.allocate_value(1000).is_ok());
    }

    #[test]
    fn test_reset_empties_cache() {
        let mut cache = cache();
        cache.set(b"k", b"v", 0, 0);
        cache.reset().unwrap();
        assert!(cache.get(b"k").is_none());
        assert!(cache.is_empty());
    }
}
