//! Monotonic timestamps shared by every process on the host

use rustix::time::{clock_gettime, ClockId};
use std::time::Duration;

/// Nanoseconds on the host's monotonic clock
pub type Timestamp = u64;

/// Current monotonic time in nanoseconds
///
/// `CLOCK_MONOTONIC` has the same origin for every process on a host, so
/// values taken in different processes are directly comparable.
#[inline]
pub fn now() -> Timestamp {
    let ts = clock_gettime(ClockId::Monotonic);
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

/// Timestamp for a new write that must sort after `previous`
///
/// Two writes inside the same clock tick would otherwise share a stamp and
/// the second would look already consumed to a reader whose cursor sits on
/// the first.
#[inline]
pub fn next_after(previous: Timestamp) -> Timestamp {
    now().max(previous.saturating_add(1))
}

/// Oldest timestamp still considered fresh for `timeout`, `None` disables expiry
#[inline]
pub fn expiry_threshold(timeout: Duration) -> Option<Timestamp> {
    if timeout.is_zero() {
        return None;
    }
    let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
    Some(now().saturating_sub(timeout_ns))
}
