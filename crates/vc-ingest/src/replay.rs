use chrono::{DateTime, Duration, Utc};

/// Safety window subtracted from the last stored event on restart, covering
/// clock jitter and log flush timing.
pub const DEFAULT_ROLLBACK_MINUTES: i64 = 5;

/// Window used when the store is empty: starting the companion after the
/// game should still capture the session already in progress.
pub const FIRST_RUN_ROLLBACK_HOURS: i64 = 24;

pub fn default_rollback() -> Duration {
    Duration::minutes(DEFAULT_ROLLBACK_MINUTES)
}

pub fn first_run_rollback() -> Duration {
    Duration::hours(FIRST_RUN_ROLLBACK_HOURS)
}

/// Compute the instant the source should replay from. With no previous
/// events the window is anchored at `now`; otherwise at the last stored
/// event.
pub fn calculate_replay_since(
    last_event_time: Option<DateTime<Utc>>,
    rollback: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match last_event_time {
        None => now - rollback,
        Some(last) => last - rollback,
    }
}
