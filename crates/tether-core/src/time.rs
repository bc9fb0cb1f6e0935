//! Wall-clock helpers for heartbeat bookkeeping

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds, zero if the clock is before the epoch
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Time elapsed since a millisecond timestamp; zero for timestamps in the future
pub fn elapsed_since(since_millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(since_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_since() {
        let now = current_time_millis();
        std::thread::sleep(Duration::from_millis(10));
        assert!(elapsed_since(now) >= Duration::from_millis(10));
    }

    #[test]
    fn test_elapsed_since_future_time() {
        let future = current_time_millis() + 1_000_000;
        assert_eq!(elapsed_since(future), Duration::ZERO);
    }
}
