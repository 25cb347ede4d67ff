//! Client-side request encoding for the Memcache binary protocol.
//!
//! Used by tests, benchmarks and tools that drive the server over the wire.

use crate::extras::Extras;
use crate::header::{HEADER_SIZE, RequestHeader};
use crate::opcode::Opcode;

/// A request builder for encoding binary Memcache commands.
#[derive(Debug, Clone)]
pub struct BinaryRequest<'a> {
    opcode: Opcode,
    key: &'a [u8],
    value: &'a [u8],
    extras: Extras,
    opaque: u32,
    cas: u64,
}

impl<'a> BinaryRequest<'a> {
    /// Create a request with no key, value or extras.
    #[inline]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            key: &[],
            value: &[],
            extras: Extras::None,
            opaque: 0,
            cas: 0,
        }
    }

    #[inline]
    fn keyed(opcode: Opcode, key: &'a [u8]) -> Self {
        Self {
            key,
            ..Self::new(opcode)
        }
    }

    #[inline]
    fn storage(opcode: Opcode, key: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            key,
            value,
            extras: Extras::Storage {
                flags: 0,
                expiration: 0,
            },
            ..Self::new(opcode)
        }
    }

    /// Create a GET request.
    pub fn get(key: &'a [u8]) -> Self {
        Self::keyed(Opcode::Get, key)
    }

    /// Create a GETK request, whose response echoes the key.
    pub fn getk(key: &'a [u8]) -> Self {
        Self::keyed(Opcode::GetK, key)
    }

    /// Create a SET request.
    pub fn set(key: &'a [u8], value: &'a [u8]) -> Self {
        Self::storage(Opcode::Set, key, value)
    }

    /// Create an ADD request.
    pub fn add(key: &'a [u8], value: &'a [u8]) -> Self {
        Self::storage(Opcode::Add, key, value)
    }

    /// Create a REPLACE request.
    pub fn replace(key: &'a [u8], value: &'a [u8]) -> Self {
        Self::storage(Opcode::Replace, key, value)
    }

    /// Create an APPEND request.
    pub fn append(key: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            value,
            ..Self::keyed(Opcode::Append, key)
        }
    }

    /// Create a PREPEND request.
    pub fn prepend(key: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            value,
            ..Self::keyed(Opcode::Prepend, key)
        }
    }

    /// Create a DELETE request.
    pub fn delete(key: &'a [u8]) -> Self {
        Self::keyed(Opcode::Delete, key)
    }

    /// Create an INCREMENT request.
    pub fn increment(key: &'a [u8], delta: u64, initial: u64, expiration: u32) -> Self {
        Self {
            extras: Extras::Counter {
                delta,
                initial,
                expiration,
            },
            ..Self::keyed(Opcode::Increment, key)
        }
    }

    /// Create a DECREMENT request.
    pub fn decrement(key: &'a [u8], delta: u64, initial: u64, expiration: u32) -> Self {
        Self {
            extras: Extras::Counter {
                delta,
                initial,
                expiration,
            },
            ..Self::keyed(Opcode::Decrement, key)
        }
    }

    /// Create a TOUCH request.
    pub fn touch(key: &'a [u8], expiration: u32) -> Self {
        Self {
            extras: Extras::Expiration(expiration),
            ..Self::keyed(Opcode::Touch, key)
        }
    }

    /// Create a GAT (get and touch) request.
    pub fn gat(key: &'a [u8], expiration: u32) -> Self {
        Self {
            extras: Extras::Expiration(expiration),
            ..Self::keyed(Opcode::Gat, key)
        }
    }

    /// Create a FLUSH request. A zero delay flushes immediately.
    pub fn flush(delay: u32) -> Self {
        let extras = if delay == 0 {
            Extras::None
        } else {
            Extras::Expiration(delay)
        };
        Self {
            extras,
            ..Self::new(Opcode::Flush)
        }
    }

    /// Create a STAT request. An empty key asks for every statistic.
    pub fn stat(key: &'a [u8]) -> Self {
        Self::keyed(Opcode::Stat, key)
    }

    /// Create a NOOP request.
    pub fn noop() -> Self {
        Self::new(Opcode::Noop)
    }

    /// Create a VERSION request.
    pub fn version() -> Self {
        Self::new(Opcode::Version)
    }

    /// Create a QUIT request.
    pub fn quit() -> Self {
        Self::new(Opcode::Quit)
    }

    /// Set the flags of a storage request.
    pub fn flags(mut self, flags: u32) -> Self {
        if let Extras::Storage { expiration, .. } = self.extras {
            self.extras = Extras::Storage { flags, expiration };
        }
        self
    }

    /// Set the expiration of a storage request.
    pub fn expiration(mut self, expiration: u32) -> Self {
        if let Extras::Storage { flags, .. } = self.extras {
            self.extras = Extras::Storage { flags, expiration };
        }
        self
    }

    /// Set the opaque value echoed in the response.
    pub fn opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    /// Set the CAS value the server compares against.
    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    /// Switch to the quiet form of the opcode, if it has one.
    pub fn quiet(mut self) -> Self {
        if let Some(quiet) = self.opcode.quiet() {
            self.opcode = quiet;
        }
        self
    }

    /// The opcode this request will be sent with.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the encoded length of this request.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.extras.len() + self.key.len() + self.value.len()
    }

    /// Encode this request into a buffer.
    ///
    /// Returns the number of bytes written. The buffer must hold at least
    /// [`encoded_len`](Self::encoded_len) bytes.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let extras_len = self.extras.len();
        let header = RequestHeader {
            opcode: self.opcode as u8,
            key_len: self.key.len() as u16,
            extras_len: extras_len as u8,
            body_len: (extras_len + self.key.len() + self.value.len()) as u32,
            opaque: self.opaque,
            cas: self.cas,
            ..Default::default()
        };

        let mut head = [0u8; HEADER_SIZE];
        header.encode(&mut head);
        buf[..HEADER_SIZE].copy_from_slice(&head);

        let mut pos = HEADER_SIZE;
        pos += self.extras.encode(&mut buf[pos..]);
        buf[pos..pos + self.key.len()].copy_from_slice(self.key);
        pos += self.key.len();
        buf[pos..pos + self.value.len()].copy_from_slice(self.value);
        pos + self.value.len()
    }

    /// Encode into a freshly allocated vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        let len = self.encode(&mut buf);
        buf.truncate(len);
        buf
    }
}
