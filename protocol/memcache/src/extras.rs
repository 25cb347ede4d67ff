//! Per-opcode extras layouts.

use crate::ParseError;
use crate::opcode::Opcode;

/// Decoded request extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extras {
    #[default]
    None,
    /// Set/Add/Replace: flags and expiration.
    Storage { flags: u32, expiration: u32 },
    /// Increment/Decrement: delta, initial value and expiration.
    Counter {
        delta: u64,
        initial: u64,
        expiration: u32,
    },
    /// Touch/GAT/Flush: expiration (or flush delay).
    Expiration(u32),
}

impl Extras {
    /// Largest extras block of any request.
    pub const MAX_LEN: usize = 20;

    /// Decode the extras for `opcode`.
    ///
    /// Flush accepts either no extras or a delay. Every other opcode must
    /// carry exactly its layout.
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidExtras {
            opcode: opcode as u8,
            len: bytes.len() as u8,
        };

        match opcode.base() {
            Opcode::Set | Opcode::Add | Opcode::Replace => {
                let bytes: &[u8; 8] = bytes.try_into().map_err(|_| invalid())?;
                Ok(Self::Storage {
                    flags: be_u32(&bytes[0..4]),
                    expiration: be_u32(&bytes[4..8]),
                })
            }
            Opcode::Increment | Opcode::Decrement => {
                let bytes: &[u8; 20] = bytes.try_into().map_err(|_| invalid())?;
                Ok(Self::Counter {
                    delta: be_u64(&bytes[0..8]),
                    initial: be_u64(&bytes[8..16]),
                    expiration: be_u32(&bytes[16..20]),
                })
            }
            Opcode::Touch | Opcode::Gat | Opcode::GatK => {
                let bytes: &[u8; 4] = bytes.try_into().map_err(|_| invalid())?;
                Ok(Self::Expiration(be_u32(bytes)))
            }
            Opcode::Flush => match bytes.len() {
                0 => Ok(Self::None),
                4 => Ok(Self::Expiration(be_u32(bytes))),
                _ => Err(invalid()),
            },
            _ if bytes.is_empty() => Ok(Self::None),
            _ => Err(invalid()),
        }
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Storage { .. } => 8,
            Self::Counter { .. } => 20,
            Self::Expiration(_) => 4,
        }
    }

    /// Returns `true` if there are no extras.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        match *self {
            Self::None => 0,
            Self::Storage { flags, expiration } => {
                buf[0..4].copy_from_slice(&flags.to_be_bytes());
                buf[4..8].copy_from_slice(&expiration.to_be_bytes());
                8
            }
            Self::Counter {
                delta,
                initial,
                expiration,
            } => {
                buf[0..8].copy_from_slice(&delta.to_be_bytes());
                buf[8..16].copy_from_slice(&initial.to_be_bytes());
                buf[16..20].copy_from_slice(&expiration.to_be_bytes());
                20
            }
            Self::Expiration(expiration) => {
                buf[0..4].copy_from_slice(&expiration.to_be_bytes());
                4
            }
        }
    }

    /// The expiration carried by these extras, if any.
    pub fn expiration(&self) -> u32 {
        match *self {
            Self::None => 0,
            Self::Storage { expiration, .. }
            | Self::Counter { expiration, .. }
            | Self::Expiration(expiration) => expiration,
        }
    }
}

#[inline]
fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
fn be_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(word)
}
