//! Client-side response decoding.

use crate::ParseError;
use crate::header::{HEADER_SIZE, ResponseHeader};
use crate::status::Status;

/// A parsed response packet borrowing from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<'a> {
    pub header: ResponseHeader,
    pub extras: &'a [u8],
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> Response<'a> {
    /// Parse one response packet.
    ///
    /// Returns the response and the number of bytes consumed, or
    /// [`ParseError::Incomplete`] if the packet is not fully buffered.
    pub fn parse(data: &'a [u8]) -> Result<(Self, usize), ParseError> {
        let head: &[u8; HEADER_SIZE] = data
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(ParseError::Incomplete)?;
        let header = ResponseHeader::parse(head)?;

        let total = HEADER_SIZE + header.body_len as usize;
        if data.len() < total {
            return Err(ParseError::Incomplete);
        }

        let extras_end = HEADER_SIZE + header.extras_len as usize;
        let key_end = extras_end + header.key_len as usize;

        Ok((
            Self {
                header,
                extras: &data[HEADER_SIZE..extras_end],
                key: &data[extras_end..key_end],
                value: &data[key_end..total],
            },
            total,
        ))
    }

    /// Decoded status, or `None` for a status this crate does not know.
    pub fn status(&self) -> Option<Status> {
        Status::from_u16(self.header.status)
    }

    /// The opaque value the request carried.
    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    /// The CAS value of the entry.
    pub fn cas(&self) -> u64 {
        self.header.cas
    }

    /// Flags returned with a retrieval response.
    pub fn flags(&self) -> Option<u32> {
        let bytes: &[u8; 4] = self.extras.try_into().ok()?;
        Some(u32::from_be_bytes(*bytes))
    }

    /// Counter value returned by increment and decrement.
    pub fn counter(&self) -> Option<u64> {
        let bytes: &[u8; 8] = self.value.try_into().ok()?;
        Some(u64::from_be_bytes(*bytes))
    }
}
