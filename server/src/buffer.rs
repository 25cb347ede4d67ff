//! Byte-stream buffers between the socket and the protocol code.
//!
//! The framer reads through [`RecvBuf`] and the serializer writes through
//! [`SendBuf`]. Neither assumes a message arrives or leaves in one
//! contiguous piece: the receive side exposes whatever window is buffered,
//! and the send side hands out fixed-size segments.

use bytes::{Buf, BytesMut};

/// Readable side of a connection buffer.
pub trait RecvBuf {
    /// The contiguous window of buffered bytes.
    fn as_slice(&self) -> &[u8];

    /// Number of buffered bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `n` bytes as read.
    fn consume(&mut self, n: usize);
}

impl RecvBuf for BytesMut {
    #[inline]
    fn as_slice(&self) -> &[u8] {
        self
    }

    #[inline]
    fn len(&self) -> usize {
        BytesMut::len(self)
    }

    #[inline]
    fn consume(&mut self, n: usize) {
        self.advance(n);
    }
}

/// Writable side of a connection buffer.
pub trait SendBuf {
    /// The next writable segment. Never empty.
    fn segment(&mut self) -> &mut [u8];

    /// Mark `n` bytes of the current segment as written.
    fn commit(&mut self, n: usize);

    /// Total bytes written and not yet drained.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `src` in, spilling across segments as needed.
    fn put(&mut self, mut src: &[u8]) {
        while !src.is_empty() {
            let segment = self.segment();
            let n = segment.len().min(src.len());
            segment[..n].copy_from_slice(&src[..n]);
            self.commit(n);
            src = &src[n..];
        }
    }
}

/// Default send segment size.
pub const SEGMENT_SIZE: usize = 16 * 1024;

/// A send buffer made of fixed-size segments.
#[derive(Debug)]
pub struct SegmentedBuf {
    segments: Vec<Box<[u8]>>,
    /// Bytes used in the last segment.
    tail: usize,
    segment_size: usize,
}

impl Default for SegmentedBuf {
    fn default() -> Self {
        Self::new(SEGMENT_SIZE)
    }
}

impl SegmentedBuf {
    pub fn new(segment_size: usize) -> Self {
        Self {
            segments: Vec::new(),
            tail: 0,
            segment_size: segment_size.max(1),
        }
    }

    /// Number of segments currently holding data.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Filled portions of each segment, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        let last = self.segments.len().saturating_sub(1);
        self.segments.iter().enumerate().map(move |(i, segment)| {
            if i == last {
                &segment[..self.tail]
            } else {
                &segment[..]
            }
        })
    }

    /// Copy everything out into one vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Drop all data, keeping one segment for reuse.
    pub fn clear(&mut self) {
        self.segments.truncate(1);
        self.tail = 0;
        if self.segments.is_empty() {
            return;
        }
        if self.segments[0].len() != self.segment_size {
            self.segments.clear();
        }
    }
}

impl SendBuf for SegmentedBuf {
    fn segment(&mut self) -> &mut [u8] {
        let full = self
            .segments
            .last()
            .is_none_or(|segment| self.tail == segment.len());
        if full {
            self.segments
                .push(vec![0u8; self.segment_size].into_boxed_slice());
            self.tail = 0;
        }
        let tail = self.tail;
        match self.segments.last_mut() {
            Some(segment) => &mut segment[tail..],
            None => &mut [],
        }
    }

    fn commit(&mut self, n: usize) {
        self.tail += n;
        debug_assert!(self.segments.last().is_some_and(|s| self.tail <= s.len()));
    }

    fn len(&self) -> usize {
        match self.segments.len() {
            0 => 0,
            n => (n - 1) * self.segment_size + self.tail,
        }
    }
}
