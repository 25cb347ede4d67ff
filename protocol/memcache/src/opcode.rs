//! Request opcodes.

/// Binary protocol opcodes handled by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    GetQ = 0x09,
    Noop = 0x0a,
    Version = 0x0b,
    GetK = 0x0c,
    GetKQ = 0x0d,
    Append = 0x0e,
    Prepend = 0x0f,
    Stat = 0x10,
    SetQ = 0x11,
    AddQ = 0x12,
    ReplaceQ = 0x13,
    DeleteQ = 0x14,
    IncrementQ = 0x15,
    DecrementQ = 0x16,
    QuitQ = 0x17,
    FlushQ = 0x18,
    AppendQ = 0x19,
    PrependQ = 0x1a,
    Touch = 0x1c,
    Gat = 0x1d,
    GatQ = 0x1e,
    GatK = 0x23,
    GatKQ = 0x24,
}

impl Opcode {
    /// Decode an opcode byte. Returns `None` for opcodes the cache does not
    /// implement.
    pub fn from_u8(value: u8) -> Option<Self> {
        use Opcode::*;
        Some(match value {
            0x00 => Get,
            0x01 => Set,
            0x02 => Add,
            0x03 => Replace,
            0x04 => Delete,
            0x05 => Increment,
            0x06 => Decrement,
            0x07 => Quit,
            0x08 => Flush,
            0x09 => GetQ,
            0x0a => Noop,
            0x0b => Version,
            0x0c => GetK,
            0x0d => GetKQ,
            0x0e => Append,
            0x0f => Prepend,
            0x10 => Stat,
            0x11 => SetQ,
            0x12 => AddQ,
            0x13 => ReplaceQ,
            0x14 => DeleteQ,
            0x15 => IncrementQ,
            0x16 => DecrementQ,
            0x17 => QuitQ,
            0x18 => FlushQ,
            0x19 => AppendQ,
            0x1a => PrependQ,
            0x1c => Touch,
            0x1d => Gat,
            0x1e => GatQ,
            0x23 => GatK,
            0x24 => GatKQ,
            _ => return None,
        })
    }

    /// The non-quiet form of this opcode.
    pub fn base(self) -> Self {
        use Opcode::*;
        match self {
            GetQ => Get,
            GetKQ => GetK,
            SetQ => Set,
            AddQ => Add,
            ReplaceQ => Replace,
            DeleteQ => Delete,
            IncrementQ => Increment,
            DecrementQ => Decrement,
            QuitQ => Quit,
            FlushQ => Flush,
            AppendQ => Append,
            PrependQ => Prepend,
            GatQ => Gat,
            GatKQ => GatK,
            other => other,
        }
    }

    /// The quiet form of this opcode, if one exists.
    pub fn quiet(self) -> Option<Self> {
        use Opcode::*;
        Some(match self.base() {
            Get => GetQ,
            GetK => GetKQ,
            Set => SetQ,
            Add => AddQ,
            Replace => ReplaceQ,
            Delete => DeleteQ,
            Increment => IncrementQ,
            Decrement => DecrementQ,
            Quit => QuitQ,
            Flush => FlushQ,
            Append => AppendQ,
            Prepend => PrependQ,
            Gat => GatQ,
            GatK => GatKQ,
            _ => return None,
        })
    }

    /// Returns `true` for opcodes that suppress some responses.
    #[inline]
    pub fn is_quiet(self) -> bool {
        self.base() != self
    }

    /// Returns `true` if a miss on this opcode inserts a new entry.
    pub fn creates_on_miss(self) -> bool {
        matches!(
            self.base(),
            Opcode::Set
                | Opcode::Add
                | Opcode::Append
                | Opcode::Prepend
                | Opcode::Increment
                | Opcode::Decrement
        )
    }

    /// Returns `true` for opcodes that return a stored value.
    pub fn is_retrieval(self) -> bool {
        matches!(
            self.base(),
            Opcode::Get | Opcode::GetK | Opcode::Gat | Opcode::GatK
        )
    }

    /// Returns `true` if the response echoes the key.
    pub fn returns_key(self) -> bool {
        matches!(self.base(), Opcode::GetK | Opcode::GatK)
    }

    /// Returns `true` for opcodes that carry a value body.
    pub fn has_value(self) -> bool {
        matches!(
            self.base(),
            Opcode::Set | Opcode::Add | Opcode::Replace | Opcode::Append | Opcode::Prepend
        )
    }

    /// Returns `true` for opcodes that need no entry lookup.
    pub fn is_special(self) -> bool {
        matches!(
            self.base(),
            Opcode::Quit | Opcode::Flush | Opcode::Noop | Opcode::Version | Opcode::Stat
        )
    }

    /// Returns `true` for opcodes that change stored data.
    pub fn is_mutation(self) -> bool {
        matches!(
            self.base(),
            Opcode::Set
                | Opcode::Add
                | Opcode::Replace
                | Opcode::Delete
                | Opcode::Increment
                | Opcode::Decrement
                | Opcode::Append
                | Opcode::Prepend
                | Opcode::Touch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_roundtrip() {
        for byte in 0u8..=0x30 {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_u8(0x1b), None);
        assert_eq!(Opcode::from_u8(0x20), None);
        assert_eq!(Opcode::from_u8(0xff), None);
    }

    #[test]
    fn test_quiet_pairs() {
        assert_eq!(Opcode::GetQ.base(), Opcode::Get);
        assert_eq!(Opcode::Set.quiet(), Some(Opcode::SetQ));
        assert_eq!(Opcode::SetQ.quiet(), Some(Opcode::SetQ));
        assert_eq!(Opcode::Noop.quiet(), None);
        assert!(Opcode::GatKQ.is_quiet());
        assert!(!Opcode::GatK.is_quiet());
        assert!(!Opcode::Touch.is_quiet());
    }

    #[test]
    fn test_creates_on_miss() {
        for op in [
            Opcode::Set,
            Opcode::SetQ,
            Opcode::Add,
            Opcode::AddQ,
            Opcode::Append,
            Opcode::PrependQ,
            Opcode::Increment,
            Opcode::DecrementQ,
        ] {
            assert!(op.creates_on_miss(), "{:?}", op);
        }
        for op in [
            Opcode::Get,
            Opcode::Replace,
            Opcode::Delete,
            Opcode::Touch,
            Opcode::Gat,
        ] {
            assert!(!op.creates_on_miss(), "{:?}", op);
        }
    }

    #[test]
    fn test_classification() {
        assert!(Opcode::GetKQ.returns_key());
        assert!(Opcode::GatK.returns_key());
        assert!(!Opcode::Get.returns_key());
        assert!(Opcode::GatQ.is_retrieval());
        assert!(Opcode::AppendQ.has_value());
        assert!(!Opcode::Increment.has_value());
        assert!(Opcode::FlushQ.is_special());
        assert!(!Opcode::Get.is_mutation());
        assert!(Opcode::Touch.is_mutation());
        assert!(!Opcode::Gat.is_mutation());
        assert!(!Opcode::GatKQ.is_mutation());
    }
}
