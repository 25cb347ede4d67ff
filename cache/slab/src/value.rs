//! Value storage handles.
//!
//! A value lives in one slab block when it fits [`LAST_SLAB_PAYLOAD`],
//! otherwise in a chain of big blocks linked through their headers. Two
//! handle types own references on that storage:
//!
//! - [`ValueBuf`]: freshly allocated storage being filled by the framer,
//!   not yet visible to any other request.
//! - [`ValueRef`]: a shared reference to a stored value captured by a
//!   retrieval, released when the response has been written.
//!
//! Both release their reference on drop, so a connection that errors out
//! half way through a response cannot leak blocks.

use std::fmt;
use std::sync::Arc;

use crate::Inner;
use crate::block::{Arena, BlockRef};
use crate::config::{BIG_BLOCK_PAYLOAD, LAST_SLAB_PAYLOAD, big_block_count, select_class};

/// How a value of a given length is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Empty,
    Class(u8),
    Big(usize),
}

impl Shape {
    pub fn of(len: usize) -> Self {
        if len == 0 {
            Self::Empty
        } else if let Some(class_id) = select_class(len) {
            Self::Class(class_id)
        } else {
            Self::Big(big_block_count(len))
        }
    }
}

/// Payload bytes used per block for a value of `len` bytes.
#[inline]
pub(crate) fn stride(len: usize) -> usize {
    if len <= LAST_SLAB_PAYLOAD {
        len
    } else {
        BIG_BLOCK_PAYLOAD
    }
}

/// Iterator over the contiguous byte runs of a stored value.
pub struct Chunks<'a> {
    arena: &'a Arena,
    next: Option<BlockRef>,
    remaining: usize,
    stride: usize,
}

impl<'a> Chunks<'a> {
    pub(crate) fn new(arena: &'a Arena, head: Option<BlockRef>, len: usize) -> Self {
        Self {
            arena,
            next: head,
            remaining: len,
            stride: stride(len),
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let block = self.next?;
        let len = self.remaining.min(self.stride);
        self.remaining -= len;
        self.next = self.arena.link(block);
        // SAFETY: whoever built this iterator holds a reference on the chain
        Some(unsafe { self.arena.bytes(block, len) })
    }
}

/// Sequential writer over a value chain.
pub(crate) struct ChainWriter {
    block: Option<BlockRef>,
    offset: usize,
    stride: usize,
}

impl ChainWriter {
    /// Position a writer `pos` bytes into a value of `len` bytes.
    pub fn at(arena: &Arena, head: Option<BlockRef>, len: usize, pos: usize) -> Self {
        let stride = stride(len);
        let mut block = head;
        let mut offset = pos;
        while offset >= stride && offset > 0 {
            match block.and_then(|b| arena.link(b)) {
                Some(next) => {
                    block = Some(next);
                    offset -= stride;
                }
                None => break,
            }
        }
        Self {
            block,
            offset,
            stride,
        }
    }

    /// Copy `src` into the chain, advancing across block boundaries.
    ///
    /// # Safety
    ///
    /// The caller must own the chain exclusively and the write must stay
    /// within the value length the chain was allocated for.
    pub unsafe fn write(&mut self, arena: &Arena, mut src: &[u8]) {
        while !src.is_empty() {
            let Some(mut block) = self.block else {
                debug_assert!(false, "write past end of value chain");
                return;
            };
            if self.offset == self.stride {
                match arena.link(block) {
                    Some(next) => {
                        block = next;
                        self.block = Some(next);
                        self.offset = 0;
                    }
                    None => {
                        debug_assert!(false, "write past end of value chain");
                        return;
                    }
                }
            }
            let n = src.len().min(self.stride - self.offset);
            // SAFETY: upheld by the caller
            unsafe { arena.write(block, self.offset, &src[..n]) };
            self.offset += n;
            src = &src[n..];
        }
    }
}

/// Uninitialized value storage being filled from the wire.
///
/// Dropping an unconsumed buffer returns its blocks to the cache.
pub struct ValueBuf {
    inner: Arc<Inner>,
    head: Option<BlockRef>,
    len: usize,
    filled: usize,
    writer: ChainWriter,
}

impl ValueBuf {
    pub(crate) fn new(inner: Arc<Inner>, head: Option<BlockRef>, len: usize) -> Self {
        let writer = ChainWriter::at(&inner.arena, head, len, 0);
        Self {
            inner,
            head,
            len,
            filled: 0,
            writer,
        }
    }

    /// Total length of the value.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes still to be written.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.len - self.filled
    }

    /// Returns `true` once every byte has been written.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.filled == self.len
    }

    /// Append bytes from `src`, returning how many were taken.
    pub fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        if n > 0 {
            // SAFETY: the buffer is the sole owner until it is consumed,
            // and `n` never runs past the allocated length
            unsafe { self.writer.write(&self.inner.arena, &src[..n]) };
            self.filled += n;
        }
        n
    }

    /// Give up ownership of the storage without releasing it.
    pub(crate) fn into_raw(mut self) -> (Option<BlockRef>, usize) {
        (self.head.take(), self.len)
    }
}

impl Drop for ValueBuf {
    fn drop(&mut self) {
        if let Some(head) = self.head.take() {
            self.inner.release_value(head, self.len);
        }
    }
}

impl fmt::Debug for ValueBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueBuf")
            .field("len", &self.len)
            .field("filled", &self.filled)
            .finish()
    }
}

/// A counted reference to a stored value.
///
/// The referenced bytes stay valid even if the entry is overwritten,
/// deleted or evicted while the reference is alive.
pub struct ValueRef {
    inner: Arc<Inner>,
    head: Option<BlockRef>,
    len: usize,
}

impl ValueRef {
    /// Wrap a chain the caller has already acquired a reference on.
    pub(crate) fn new(inner: Arc<Inner>, head: Option<BlockRef>, len: usize) -> Self {
        Self { inner, head, len }
    }

    /// Length of the value.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over the value one block at a time.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks::new(&self.inner.arena, self.head, self.len)
    }

    /// Copy the value into a vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

impl Drop for ValueRef {
    fn drop(&mut self) {
        if let Some(head) = self.head.take() {
            self.inner.release_value(head, self.len);
        }
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRef").field("len", &self.len).finish()
    }
}

impl PartialEq<[u8]> for ValueRef {
    fn eq(&self, other: &[u8]) -> bool {
        if self.len != other.len() {
            return false;
        }
        let mut rest = other;
        for chunk in self.chunks() {
            let (head, tail) = rest.split_at(chunk.len());
            if head != chunk {
                return false;
            }
            rest = tail;
        }
        true
    }
}
