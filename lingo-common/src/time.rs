//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Instant `hours` from now, used for invite expiry
pub fn hours_from_now(hours: i64) -> DateTime<Utc> {
    now() + Duration::hours(hours)
}

/// Storage representation (RFC 3339)
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a timestamp written by [`to_storage`]
pub fn from_storage(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Failed to parse timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[tokio::test]
    async fn test_now_successive_calls_advance() {
        let time1 = now();
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        let time2 = now();
        assert!(time2 > time1);
    }

    #[test]
    fn test_storage_round_trip_is_exact() {
        let ts = now();
        let parsed = from_storage(&to_storage(&ts)).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_from_storage_rejects_garbage() {
        assert!(from_storage("yesterday").is_err());
    }

    #[test]
    fn test_hours_from_now_is_in_future() {
        assert!(hours_from_now(1) > now());
    }
}
