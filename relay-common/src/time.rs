use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current unix timestamp in whole seconds.
///
/// Every time-dependent decision in the rate engine (`relay-quotas`) takes
/// `now` as an explicit parameter rather than reading the clock itself, so
/// this is the single place that actually touches [`SystemTime::now`] on the
/// live request path; tests pass fixed timestamps instead.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Floors `now` down to the start of the `period_seconds`-wide bucket it
/// falls in, e.g. `bucket(125, 60) == 120`.
pub fn bucket(now: u64, period_seconds: u64) -> u64 {
    (now / period_seconds) * period_seconds
}

/// Seconds remaining until the bucket containing `now` ends.
pub fn remaining_in_bucket(now: u64, period_seconds: u64) -> u64 {
    bucket(now, period_seconds) + period_seconds - now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_floor_to_period() {
        assert_eq!(bucket(125, 60), 120);
        assert_eq!(bucket(120, 60), 120);
        assert_eq!(bucket(59, 60), 0);
    }

    #[test]
    fn remaining_is_time_to_bucket_end() {
        assert_eq!(remaining_in_bucket(125, 60), 55);
        assert_eq!(remaining_in_bucket(120, 60), 60);
    }
}
