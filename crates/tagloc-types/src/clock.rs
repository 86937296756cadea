//! Process-wide monotonic nanosecond clock.
//!
//! Candidate timestamps from every camera thread are compared against each
//! other, so they all come from the same [`Instant`] epoch captured the first
//! time the clock is read.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the process-wide epoch.
pub fn now_ns() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Age of `timestamp_ns` relative to `now_ns`, zero for timestamps from the
/// future.
pub fn age(now_ns: u64, timestamp_ns: u64) -> Duration {
    Duration::from_nanos(now_ns.saturating_sub(timestamp_ns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let a = now_ns();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_ns();
        assert!(b > a);
    }

    #[test]
    fn future_timestamps_have_zero_age() {
        assert_eq!(age(10, 50), Duration::ZERO);
        assert_eq!(age(50, 10), Duration::from_nanos(40));
    }
}
