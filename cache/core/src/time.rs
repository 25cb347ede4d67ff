//! Coarse clock and memcached expiration handling.

/// Expiration values above this many seconds are absolute unix times,
/// values at or below it are relative to now (memcached convention).
pub const RELATIVE_EXPIRE_LIMIT: u32 = 60 * 60 * 24 * 30;

/// Current coarse unix time in seconds.
#[inline]
pub fn now_unix_secs() -> u32 {
    clocksource::coarse::UnixInstant::now()
        .duration_since(clocksource::coarse::UnixInstant::EPOCH)
        .as_secs()
}

/// Convert a wire expiration into an absolute unix deadline.
///
/// Returns 0 for "never expires".
#[inline]
pub fn expire_at(expiration: u32, now: u32) -> u32 {
    match expiration {
        0 => 0,
        e if e <= RELATIVE_EXPIRE_LIMIT => now.saturating_add(e),
        e => e,
    }
}

/// Returns `true` if an absolute deadline has passed at `now`.
#[inline]
pub fn is_expired(deadline: u32, now: u32) -> bool {
    deadline != 0 && deadline <= now
}
