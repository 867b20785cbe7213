//! Wall-clock helpers. All persisted timestamps are Unix milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in Unix milliseconds. A clock before the epoch reads as 0.
pub fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_past_2024() {
        assert!(unix_timestamp_millis() > 1_704_067_200_000);
    }
}
