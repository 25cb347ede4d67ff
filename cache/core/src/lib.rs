//! cache-core: shared building blocks for the slab cache.
//!
//! This crate holds the pieces of the cache that do not depend on the
//! allocator or hashtable design:
//!
//! - **Memory providers**: [`MemoryProvider`] hands out large page-aligned
//!   regions. [`MmapProvider`] uses anonymous mmap with optional hugepages,
//!   [`HeapProvider`] uses the global allocator.
//! - **Hashing**: 64-bit FNV-1a over key bytes.
//! - **Numerics**: decimal ASCII parsing and rendering for counter values.
//! - **Clock**: coarse unix seconds and memcached expiration conversion.
//! - **Errors**: [`CacheError`] and [`CacheResult`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod hash;
mod hugepage;
mod provider;

pub mod numeric;
pub mod time;

pub use error::{CacheError, CacheResult};
pub use hash::fnv1a_64;
pub use hugepage::{AllocatedPageSize, HugepageSize, MmapProvider};
pub use provider::{HeapProvider, MemoryProvider, RawRegion};
