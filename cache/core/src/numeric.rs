//! Numeric utilities for counter values stored as decimal ASCII.
//!
//! Increment and decrement operate on values that clients stored as text,
//! so the stored representation stays ASCII digits and is parsed and
//! re-rendered on every counter update.

/// Maximum number of ASCII digits in a u64.
pub const MAX_DIGITS: usize = 20;

/// Parse a byte slice as an unsigned decimal integer.
///
/// Accepts one or more ASCII digits (leading zeros allowed) that fit in a
/// u64. Anything else, including whitespace and signs, is rejected.
///
/// # Examples
/// ```
/// use cache_core::numeric::parse_decimal;
///
/// assert_eq!(parse_decimal(b"0"), Some(0));
/// assert_eq!(parse_decimal(b"007"), Some(7));
/// assert_eq!(parse_decimal(b" 5"), None);
/// assert_eq!(parse_decimal(b"hello"), None);
/// ```
pub fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }

    let mut value: u64 = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }
        let digit = (byte - b'0') as u64;
        value = value.checked_mul(10)?.checked_add(digit)?;
    }

    Some(value)
}

/// Format a u64 value to ASCII digits.
///
/// Writes the ASCII representation of `value` to `buf` and returns the
/// number of bytes written.
///
/// # Examples
/// ```
/// use cache_core::numeric::format_decimal;
///
/// let mut buf = [0u8; 20];
/// let len = format_decimal(12345, &mut buf);
/// assert_eq!(&buf[..len], b"12345");
/// ```
pub fn format_decimal(value: u64, buf: &mut [u8; MAX_DIGITS]) -> usize {
    if value == 0 {
        buf[0] = b'0';
        return 1;
    }

    // Write digits in reverse order
    let mut v = value;
    let mut pos = MAX_DIGITS;
    while v > 0 {
        pos -= 1;
        buf[pos] = b'0' + (v % 10) as u8;
        v /= 10;
    }

    let len = MAX_DIGITS - pos;
    buf.copy_within(pos..MAX_DIGITS, 0);
    len
}
