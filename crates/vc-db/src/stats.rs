use crate::error::StoreError;
use crate::store::Store;
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use vc_core::event::EventType;
use vc_core::time::format_ts;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BasicStats {
    pub join_count: i64,
    pub leave_count: i64,
    pub world_change_count: i64,
    pub recent_players: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<String>,
}

impl Store {
    /// Aggregate counts inside `[since, until)` plus the last five distinct
    /// joiner names (most recent first) and the global last event instant.
    pub fn get_basic_stats(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<BasicStats, StoreError> {
        let (join_count, leave_count, world_change_count) = self.connection().query_row(
            "SELECT \
                COALESCE(SUM(CASE WHEN type = ?1 THEN 1 ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN type = ?2 THEN 1 ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN type = ?3 THEN 1 ELSE 0 END), 0) \
             FROM events WHERE ts >= ?4 AND ts < ?5",
            rusqlite::params![
                EventType::PlayerJoin.as_str(),
                EventType::PlayerLeft.as_str(),
                EventType::WorldJoin.as_str(),
                format_ts(&since),
                format_ts(&until),
            ],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = self.connection().prepare(
            "SELECT player_name FROM events \
             WHERE type = ?1 AND player_name IS NOT NULL AND player_name != '' \
             GROUP BY player_name ORDER BY MAX(ts) DESC LIMIT 5",
        )?;
        let rows = stmt.query_map([EventType::PlayerJoin.as_str()], |row| row.get(0))?;
        let mut recent_players = Vec::with_capacity(5);
        for row in rows {
            recent_players.push(row?);
        }

        let last_event_at = self.get_last_event_time()?.map(|ts| format_ts(&ts));

        Ok(BasicStats {
            join_count,
            leave_count,
            world_change_count,
            recent_players,
            last_event_at,
        })
    }
}

/// Start and end of "today" in the operator's local timezone, as UTC
/// instants.
pub fn today_boundary() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Local::now();
    let midnight = chrono::NaiveDateTime::new(now.date_naive(), chrono::NaiveTime::MIN);
    let since = Local
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or(now)
        .with_timezone(&Utc);
    (since, since + Duration::days(1))
}
