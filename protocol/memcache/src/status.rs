//! Response status codes.

/// Outcome of a single request, carried in the response header.
///
/// These are normal results, not failures of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    NoError = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    ValueTooLarge = 0x0003,
    InvalidArguments = 0x0004,
    NotStored = 0x0005,
    NonNumeric = 0x0006,
    UnknownCommand = 0x0081,
    OutOfMemory = 0x0082,
}

impl Status {
    /// Decode a status from the wire.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::NoError),
            0x0001 => Some(Self::KeyNotFound),
            0x0002 => Some(Self::KeyExists),
            0x0003 => Some(Self::ValueTooLarge),
            0x0004 => Some(Self::InvalidArguments),
            0x0005 => Some(Self::NotStored),
            0x0006 => Some(Self::NonNumeric),
            0x0081 => Some(Self::UnknownCommand),
            0x0082 => Some(Self::OutOfMemory),
            _ => None,
        }
    }

    /// Returns `true` for [`Status::NoError`].
    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::NoError
    }

    /// Human readable text sent as the body of an error response.
    pub fn message(self) -> &'static str {
        match self {
            Self::NoError => "",
            Self::KeyNotFound => "Not found",
            Self::KeyExists => "Data exists for key.",
            Self::ValueTooLarge => "Too large.",
            Self::InvalidArguments => "Invalid arguments",
            Self::NotStored => "Not stored.",
            Self::NonNumeric => "Non-numeric server-side value for incr or decr",
            Self::UnknownCommand => "Unknown command",
            Self::OutOfMemory => "Out of memory",
        }
    }
}
