//! Fixed 24-byte packet header.

use crate::ParseError;
use crate::status::Status;

/// Size of every request and response header.
pub const HEADER_SIZE: usize = 24;

/// Magic byte opening a request packet.
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte opening a response packet.
pub const RESPONSE_MAGIC: u8 = 0x81;

/// A decoded request header.
///
/// The opcode is kept raw so the executor can answer unknown opcodes with
/// [`Status::UnknownCommand`] instead of dropping the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestHeader {
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub vbucket: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl RequestHeader {
    /// Parse a request header.
    ///
    /// Fails on a wrong magic byte or when the body cannot hold the declared
    /// extras and key; both mean the stream is corrupt.
    pub fn parse(buf: &[u8; HEADER_SIZE]) -> Result<Self, ParseError> {
        if buf[0] != REQUEST_MAGIC {
            return Err(ParseError::BadMagic(buf[0]));
        }

        let header = Self {
            opcode: buf[1],
            key_len: u16::from_be_bytes([buf[2], buf[3]]),
            extras_len: buf[4],
            data_type: buf[5],
            vbucket: u16::from_be_bytes([buf[6], buf[7]]),
            body_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            opaque: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            cas: u64::from_be_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
        };

        let required = header.key_len as u32 + header.extras_len as u32;
        if header.body_len < required {
            return Err(ParseError::BodyTooShort {
                body: header.body_len,
                required,
            });
        }

        Ok(header)
    }

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut [u8; HEADER_SIZE]) {
        buf[0] = REQUEST_MAGIC;
        buf[1] = self.opcode;
        buf[2..4].copy_from_slice(&self.key_len.to_be_bytes());
        buf[4] = self.extras_len;
        buf[5] = self.data_type;
        buf[6..8].copy_from_slice(&self.vbucket.to_be_bytes());
        buf[8..12].copy_from_slice(&self.body_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_be_bytes());
    }

    /// Length of the value that follows extras and key.
    #[inline]
    pub fn value_len(&self) -> usize {
        (self.body_len - self.key_len as u32 - self.extras_len as u32) as usize
    }
}

/// A response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseHeader {
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl ResponseHeader {
    /// Start a response to `opcode` with the given status.
    pub fn new(opcode: u8, status: Status, opaque: u32) -> Self {
        Self {
            opcode,
            status: status as u16,
            opaque,
            ..Default::default()
        }
    }

    /// Parse a response header.
    pub fn parse(buf: &[u8; HEADER_SIZE]) -> Result<Self, ParseError> {
        if buf[0] != RESPONSE_MAGIC {
            return Err(ParseError::BadMagic(buf[0]));
        }

        let header = Self {
            opcode: buf[1],
            key_len: u16::from_be_bytes([buf[2], buf[3]]),
            extras_len: buf[4],
            data_type: buf[5],
            status: u16::from_be_bytes([buf[6], buf[7]]),
            body_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            opaque: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            cas: u64::from_be_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
        };

        let required = header.key_len as u32 + header.extras_len as u32;
        if header.body_len < required {
            return Err(ParseError::BodyTooShort {
                body: header.body_len,
                required,
            });
        }

        Ok(header)
    }

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut [u8; HEADER_SIZE]) {
        buf[0] = RESPONSE_MAGIC;
        buf[1] = self.opcode;
        buf[2..4].copy_from_slice(&self.key_len.to_be_bytes());
        buf[4] = self.extras_len;
        buf[5] = self.data_type;
        buf[6..8].copy_from_slice(&self.status.to_be_bytes());
        buf[8..12].copy_from_slice(&self.body_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_be_bytes());
    }

    /// Length of the value that follows extras and key.
    #[inline]
    pub fn value_len(&self) -> usize {
        (self.body_len - self.key_len as u32 - self.extras_len as u32) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_layout() {
        let header = RequestHeader {
            opcode: 0x01,
            key_len: 3,
            extras_len: 8,
            body_len: 16,
            opaque: 0xdeadbeef,
            cas: 0x0102030405060708,
            ..Default::default()
        };
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);

        assert_eq!(buf[0], REQUEST_MAGIC);
        assert_eq!(&buf[2..4], &[0, 3]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 16]);
        assert_eq!(&buf[12..16], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&buf[16..24], &[1, 2, 3, 4, 5, 6, 7, 8]);

        let parsed = RequestHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.value_len(), 5);
    }

    #[test]
    fn test_request_header_bad_magic() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = b'g';
        assert_eq!(RequestHeader::parse(&buf), Err(ParseError::BadMagic(b'g')));

        buf[0] = RESPONSE_MAGIC;
        assert_eq!(
            RequestHeader::parse(&buf),
            Err(ParseError::BadMagic(RESPONSE_MAGIC))
        );
    }

    #[test]
    fn test_request_header_body_too_short() {
        let header = RequestHeader {
            key_len: 10,
            extras_len: 4,
            body_len: 12,
            ..Default::default()
        };
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        assert_eq!(
            RequestHeader::parse(&buf),
            Err(ParseError::BodyTooShort {
                body: 12,
                required: 14
            })
        );
    }

    #[test]
    fn test_response_header_status() {
        let mut header = ResponseHeader::new(0x00, Status::KeyNotFound, 9);
        header.body_len = 9;
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);

        assert_eq!(buf[0], RESPONSE_MAGIC);
        assert_eq!(&buf[6..8], &[0, 1]);

        let parsed = ResponseHeader::parse(&buf).unwrap();
        assert_eq!(parsed.status, Status::KeyNotFound as u16);
        assert_eq!(parsed.opaque, 9);
        assert_eq!(parsed.value_len(), 9);
    }
}
