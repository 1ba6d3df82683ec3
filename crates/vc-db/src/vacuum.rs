use crate::error::StoreError;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use vc_core::time::{format_ts, parse_ts};

/// Minimum interval between VACUUM passes.
pub const VACUUM_INTERVAL_DAYS: i64 = 30;

const METADATA_KEY_LAST_VACUUM: &str = "last_vacuum_at";

impl Store {
    /// Compact the database when the last pass is older than the interval.
    /// Returns true when VACUUM ran. Failing to record the new instant is
    /// logged but does not fail the operation.
    pub fn vacuum_if_needed(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if let Some(last) = self.get_last_vacuum_time()? {
            if now - last < Duration::days(VACUUM_INTERVAL_DAYS) {
                return Ok(false);
            }
        }

        info!("running database VACUUM");
        self.connection().execute_batch("VACUUM")?;

        if let Err(err) = self.set_last_vacuum_time(now) {
            warn!(error = %err, "failed to record last vacuum instant");
        }
        Ok(true)
    }

    fn get_last_vacuum_time(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let value: Option<String> = self
            .connection()
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [METADATA_KEY_LAST_VACUUM],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        // An unreadable instant just triggers the next pass.
        Ok(value.and_then(|text| parse_ts(&text).ok()))
    }

    fn set_last_vacuum_time(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.connection().execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            rusqlite::params![METADATA_KEY_LAST_VACUUM, format_ts(&now)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn first_run_vacuums_and_records_instant() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert!(store.vacuum_if_needed(now).unwrap());
        assert_eq!(store.get_last_vacuum_time().unwrap(), Some(now));
    }

    #[test]
    fn skips_within_interval_and_runs_after() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        store.vacuum_if_needed(now).unwrap();

        assert!(!store
            .vacuum_if_needed(now + Duration::days(29))
            .unwrap());
        assert!(store
            .vacuum_if_needed(now + Duration::days(30))
            .unwrap());
    }

    #[test]
    fn unreadable_instant_triggers_vacuum() {
        let store = Store::open_in_memory().unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO metadata (key, value) VALUES ('last_vacuum_at', 'garbage')",
                [],
            )
            .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert!(store.vacuum_if_needed(now).unwrap());
    }
}
