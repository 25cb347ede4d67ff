//! Memcached binary protocol server for the slab cache.
//!
//! Bytes flow through a per-connection pipeline:
//!
//! ```text
//! socket -> BytesMut -> Framer -> Batch -> SlabCache::execute
//!                                            |
//! socket <- SegmentedBuf <- serializer <- responses
//! ```
//!
//! The framer and serializer work on the [`buffer`] traits and never
//! assume a packet is contiguous, so values of any size stream straight
//! between socket buffers and cache blocks.

pub mod banner;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod framer;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod serializer;
pub mod signal;

pub use config::{Config, ConfigError};
pub use connection::Connection;
pub use framer::{FrameError, Framer, Progress};
