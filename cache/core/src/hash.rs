//! 64-bit FNV-1a key hashing.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Hash key bytes with 64-bit FNV-1a.
///
/// Keys are hashed once when a request is framed; the hashtable uses the low
/// bits to pick a top-level bucket and successive nibbles above them to
/// descend into split sub-tables.
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
