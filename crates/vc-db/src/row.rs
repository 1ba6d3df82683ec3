use crate::error::StoreError;
use vc_core::event::{Event, EventType};
use vc_core::time::parse_ts;

/// Raw `events` row as read from SQLite, before timestamp decoding.
pub(crate) struct EventRow {
    pub id: i64,
    pub ts: String,
    pub event_type: String,
    pub player_name: Option<String>,
    pub player_id: Option<String>,
    pub world_id: Option<String>,
    pub world_name: Option<String>,
    pub instance_id: Option<String>,
    pub meta_json: Option<String>,
    pub dedupe_key: String,
    pub ingested_at: String,
    pub schema_version: i32,
}

pub(crate) const EVENT_COLUMNS: &str = "id, ts, type, player_name, player_id, world_id, world_name, instance_id, meta_json, dedupe_key, ingested_at, schema_version";

pub(crate) fn map_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        ts: row.get(1)?,
        event_type: row.get(2)?,
        player_name: row.get(3)?,
        player_id: row.get(4)?,
        world_id: row.get(5)?,
        world_name: row.get(6)?,
        instance_id: row.get(7)?,
        meta_json: row.get(8)?,
        dedupe_key: row.get(9)?,
        ingested_at: row.get(10)?,
        schema_version: row.get(11)?,
    })
}

impl EventRow {
    /// A stored timestamp that no longer parses is corruption, not a soft
    /// error; surface it instead of skipping the row.
    pub(crate) fn into_event(self) -> Result<Event, StoreError> {
        let ts = parse_ts(&self.ts).map_err(|_| StoreError::CorruptTimestamp {
            column: "ts",
            value: self.ts.clone(),
        })?;
        let ingested_at =
            parse_ts(&self.ingested_at).map_err(|_| StoreError::CorruptTimestamp {
                column: "ingested_at",
                value: self.ingested_at.clone(),
            })?;
        let event_type =
            EventType::parse(&self.event_type).ok_or(StoreError::InvalidEvent {
                reason: "unknown stored event type",
            })?;

        Ok(Event {
            id: self.id,
            ts,
            event_type,
            player_name: self.player_name,
            player_id: self.player_id,
            world_id: self.world_id,
            world_name: self.world_name,
            instance_id: self.instance_id,
            meta_json: self
                .meta_json
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            dedupe_key: self.dedupe_key,
            ingested_at,
            schema_version: self.schema_version,
        })
    }
}
