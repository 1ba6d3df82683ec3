use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Fixed-width UTC timestamp format with nanosecond precision. The width is
/// constant so lexicographic order on the stored text equals chronological
/// order.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

#[derive(Debug, Error)]
#[error("invalid timestamp: {value}")]
pub struct TimestampError {
    pub value: String,
}

pub fn format_ts(value: &DateTime<Utc>) -> String {
    value.format(TIME_FORMAT).to_string()
}

pub fn parse_ts(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| TimestampError {
            value: value.to_string(),
        })
}

/// Serde adapter so wire timestamps use the canonical form.
pub mod serde_canonical {
    use super::{format_ts, parse_ts};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_ts(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_ts(&text).map_err(serde::de::Error::custom)
    }
}

/// Time source abstraction so ingest stamping, token expiry, lockout windows,
/// and backoff can all be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Manually advanced clock for tests.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<parking_lot::Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    pub fn set(&self, value: DateTime<Utc>) {
        *self.now.lock() = value;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock();
        *guard += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn format_is_fixed_width_nanoseconds() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let s = format_ts(&t);
        assert_eq!(s, "2024-01-15T10:30:45.000000000Z");
        assert_eq!(s.len(), 30);

        let sub = t + Duration::nanoseconds(123);
        assert_eq!(format_ts(&sub), "2024-01-15T10:30:45.000000123Z");
    }

    #[test]
    fn parse_round_trips() {
        let t = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap() + Duration::nanoseconds(999_999_999);
        assert_eq!(parse_ts(&format_ts(&t)).unwrap(), t);
        assert!(parse_ts("2024-01-15 10:30:45").is_err());
        assert!(parse_ts("").is_err());
    }

    #[test]
    fn lexicographic_order_matches_chronological_order() {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let times = [
            base,
            base + Duration::nanoseconds(1),
            base + Duration::seconds(1),
            base + Duration::days(1),
            base + Duration::days(365),
        ];
        for pair in times.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(format_ts(&pair[0]) < format_ts(&pair[1]));
        }
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));
    }
}
