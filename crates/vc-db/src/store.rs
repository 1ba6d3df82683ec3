use crate::cursor::{decode_cursor, encode_cursor};
use crate::error::StoreError;
use crate::row::{map_event_row, EVENT_COLUMNS};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;
use vc_core::event::{Event, EventType};
use vc_core::time::{format_ts, parse_ts};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 500;

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Durable append-only event log over a single SQLite connection. WAL mode
/// lets other connections read while this one writes, so HTTP handlers open
/// their own short-lived stores against the same file.
pub struct Store {
    conn: Connection,
}

/// Event shape handed to `insert_event`; the store assigns the row id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub ts: DateTime<Utc>,
    pub event_type: EventType,
    pub player_name: Option<String>,
    pub player_id: Option<String>,
    pub world_id: Option<String>,
    pub world_name: Option<String>,
    pub instance_id: Option<String>,
    pub meta_json: Option<serde_json::Value>,
    pub dedupe_key: String,
    pub ingested_at: DateTime<Utc>,
}

impl NewEvent {
    pub fn into_event(self, id: i64) -> Event {
        Event {
            id,
            ts: self.ts,
            event_type: self.event_type,
            player_name: self.player_name,
            player_id: self.player_id,
            world_id: self.world_id,
            world_name: self.world_name,
            instance_id: self.instance_id,
            meta_json: self.meta_json,
            dedupe_key: self.dedupe_key,
            ingested_at: self.ingested_at,
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub event_type: Option<EventType>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub order: QueryOrder,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub items: Vec<Event>,
    pub next_cursor: Option<String>,
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

impl Store {
    pub fn open(path: &Path) -> Result<Store, StoreError> {
        let conn = crate::schema::open_and_migrate(path)?;
        Ok(Store { conn })
    }

    pub fn open_in_memory() -> Result<Store, StoreError> {
        let conn = crate::schema::with_test_db()?;
        Ok(Store { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert-if-new keyed on `dedupe_key`. Returns `(id, true)` for a fresh
    /// row and `(0, false)` when the fingerprint was already present.
    pub fn insert_event(&self, event: &NewEvent) -> Result<(i64, bool), StoreError> {
        if event.dedupe_key.is_empty() {
            return Err(StoreError::InvalidEvent {
                reason: "dedupe_key is required",
            });
        }

        let sql = "INSERT INTO events \
            (ts, type, player_name, player_id, world_id, world_name, instance_id, meta_json, dedupe_key, ingested_at, schema_version) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
            ON CONFLICT(dedupe_key) DO NOTHING";

        let meta_json = event
            .meta_json
            .as_ref()
            .map(|value| value.to_string());

        let changed = self.conn.execute(
            sql,
            rusqlite::params![
                format_ts(&event.ts),
                event.event_type.as_str(),
                event.player_name,
                event.player_id,
                event.world_id,
                event.world_name,
                event.instance_id,
                meta_json,
                event.dedupe_key,
                format_ts(&event.ingested_at),
                CURRENT_SCHEMA_VERSION,
            ],
        )?;

        if changed > 0 {
            Ok((self.conn.last_insert_rowid(), true))
        } else {
            Ok((0, false))
        }
    }

    /// Record an unparseable source line, fingerprinted by its SHA-256 so a
    /// re-tailed file does not duplicate rows. Returns true when inserted.
    pub fn insert_parse_failure(
        &self,
        raw_line: &str,
        error_msg: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if raw_line.is_empty() {
            return Err(StoreError::InvalidEvent {
                reason: "raw_line is required",
            });
        }

        let changed = self.conn.execute(
            "INSERT INTO parse_failures (ts, raw_line, error_msg, dedupe_key) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(dedupe_key) DO NOTHING",
            rusqlite::params![format_ts(&now), raw_line, error_msg, sha256_hex(raw_line)],
        )?;
        Ok(changed > 0)
    }

    /// Range and cursor paged query. `since`/`until` are half-open
    /// (`since <= ts < until`); the cursor is strict (exclusive of its row).
    pub fn query_events(&self, filter: &QueryFilter) -> Result<QueryResult, StoreError> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT);

        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE 1=1");
        let mut params: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(since) = &filter.since {
            sql.push_str(" AND ts >= ?");
            params.push(format_ts(since).into());
        }
        if let Some(until) = &filter.until {
            sql.push_str(" AND ts < ?");
            params.push(format_ts(until).into());
        }
        if let Some(event_type) = filter.event_type {
            sql.push_str(" AND type = ?");
            params.push(event_type.as_str().to_string().into());
        }
        if let Some(cursor) = filter.cursor.as_deref().filter(|c| !c.is_empty()) {
            let (cursor_ts, cursor_id) = decode_cursor(cursor)?;
            let ts_text = format_ts(&cursor_ts);
            match filter.order {
                QueryOrder::Asc => sql.push_str(" AND (ts > ? OR (ts = ? AND id > ?))"),
                QueryOrder::Desc => sql.push_str(" AND (ts < ? OR (ts = ? AND id < ?))"),
            }
            params.push(ts_text.clone().into());
            params.push(ts_text.into());
            params.push(cursor_id.into());
        }

        match filter.order {
            QueryOrder::Asc => sql.push_str(" ORDER BY ts ASC, id ASC"),
            QueryOrder::Desc => sql.push_str(" ORDER BY ts DESC, id DESC"),
        }
        sql.push_str(" LIMIT ?");
        // One extra row tells us whether a next page exists.
        params.push((limit as i64 + 1).into());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), map_event_row)?;

        let mut items = Vec::with_capacity(limit + 1);
        for row in rows {
            items.push(row?.into_event()?);
        }

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            let last = &items[limit - 1];
            Some(encode_cursor(&last.ts, last.id))
        } else {
            None
        };

        Ok(QueryResult { items, next_cursor })
    }

    pub fn get_last_event_time(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT ts FROM events ORDER BY ts DESC, id DESC LIMIT 1")?;
        let ts: Option<String> = stmt
            .query_row([], |row| row.get(0))
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match ts {
            None => Ok(None),
            Some(text) => parse_ts(&text)
                .map(Some)
                .map_err(|_| StoreError::CorruptTimestamp {
                    column: "ts",
                    value: text,
                }),
        }
    }

    pub fn count_events(&self) -> Result<i64, StoreError> {
        let count =
            self.conn
                .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn ping(&self) -> Result<(), StoreError> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn new_event(ts: DateTime<Utc>, raw_line: &str, event_type: EventType) -> NewEvent {
        NewEvent {
            ts,
            event_type,
            player_name: Some("Alice".to_string()),
            player_id: Some("usr_a".to_string()),
            world_id: None,
            world_name: None,
            instance_id: None,
            meta_json: None,
            dedupe_key: sha256_hex(raw_line),
            ingested_at: ts,
        }
    }

    fn base_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap()
    }

    #[test]
    fn insert_assigns_ids_and_deduplicates() {
        let store = Store::open_in_memory().unwrap();
        let event = new_event(base_ts(), "L1", EventType::PlayerJoin);

        let (id, inserted) = store.insert_event(&event).unwrap();
        assert!(inserted);
        assert!(id > 0);

        // Same raw line replayed after restart: silently dropped.
        let (dup_id, dup_inserted) = store.insert_event(&event).unwrap();
        assert!(!dup_inserted);
        assert_eq!(dup_id, 0);
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[test]
    fn insert_rejects_missing_dedupe_key() {
        let store = Store::open_in_memory().unwrap();
        let mut event = new_event(base_ts(), "L1", EventType::PlayerJoin);
        event.dedupe_key = String::new();
        let err = store.insert_event(&event).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEvent { .. }));
    }

    #[test]
    fn cursor_paging_covers_all_rows_without_overlap() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            let ts = base_ts() + Duration::seconds(i);
            let event = new_event(ts, &format!("L{i}"), EventType::PlayerJoin);
            store.insert_event(&event).unwrap();
        }

        let mut filter = QueryFilter {
            limit: Some(3),
            ..QueryFilter::default()
        };

        let page1 = store.query_events(&filter).unwrap();
        assert_eq!(
            page1.items.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        let expected = encode_cursor(&(base_ts() + Duration::seconds(2)), 3);
        assert_eq!(page1.next_cursor.as_deref(), Some(expected.as_str()));

        let mut seen = page1.items.iter().map(|e| e.id).collect::<Vec<_>>();
        filter.cursor = page1.next_cursor;
        loop {
            let page = store.query_events(&filter).unwrap();
            seen.extend(page.items.iter().map(|e| e.id));
            match page.next_cursor {
                Some(cursor) => filter.cursor = Some(cursor),
                None => break,
            }
        }
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn ties_on_ts_are_broken_by_id() {
        let store = Store::open_in_memory().unwrap();
        let ts = base_ts();
        store
            .insert_event(&new_event(ts, "A", EventType::PlayerJoin))
            .unwrap();
        store
            .insert_event(&new_event(ts, "B", EventType::PlayerJoin))
            .unwrap();
        store
            .insert_event(&new_event(
                ts + Duration::seconds(1),
                "C",
                EventType::PlayerJoin,
            ))
            .unwrap();

        // Resume after the first event; the same-timestamp sibling must not
        // be skipped.
        let filter = QueryFilter {
            cursor: Some(encode_cursor(&ts, 1)),
            ..QueryFilter::default()
        };
        let result = store.query_events(&filter).unwrap();
        assert_eq!(
            result.items.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn descending_order_mirrors_cursor_predicate() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            let ts = base_ts() + Duration::seconds(i);
            store
                .insert_event(&new_event(ts, &format!("L{i}"), EventType::PlayerJoin))
                .unwrap();
        }

        let mut filter = QueryFilter {
            limit: Some(2),
            order: QueryOrder::Desc,
            ..QueryFilter::default()
        };
        let page1 = store.query_events(&filter).unwrap();
        assert_eq!(
            page1.items.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![5, 4]
        );

        filter.cursor = page1.next_cursor;
        let page2 = store.query_events(&filter).unwrap();
        assert_eq!(
            page2.items.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![3, 2]
        );
    }

    #[test]
    fn since_until_are_half_open() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..4 {
            let ts = base_ts() + Duration::seconds(i);
            store
                .insert_event(&new_event(ts, &format!("L{i}"), EventType::PlayerJoin))
                .unwrap();
        }

        let filter = QueryFilter {
            since: Some(base_ts() + Duration::seconds(1)),
            until: Some(base_ts() + Duration::seconds(3)),
            ..QueryFilter::default()
        };
        let result = store.query_events(&filter).unwrap();
        assert_eq!(
            result.items.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn type_filter_restricts_rows() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_event(&new_event(base_ts(), "J", EventType::PlayerJoin))
            .unwrap();
        store
            .insert_event(&new_event(
                base_ts() + Duration::seconds(1),
                "L",
                EventType::PlayerLeft,
            ))
            .unwrap();

        let filter = QueryFilter {
            event_type: Some(EventType::PlayerLeft),
            ..QueryFilter::default()
        };
        let result = store.query_events(&filter).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].event_type, EventType::PlayerLeft);
    }

    #[test]
    fn limit_is_clamped_to_max() {
        let store = Store::open_in_memory().unwrap();
        let filter = QueryFilter {
            limit: Some(100_000),
            ..QueryFilter::default()
        };
        // No rows; the point is that the clamp does not error.
        let result = store.query_events(&filter).unwrap();
        assert!(result.items.is_empty());
        assert!(result.next_cursor.is_none());
    }

    #[test]
    fn invalid_cursor_is_a_distinct_error() {
        let store = Store::open_in_memory().unwrap();
        let filter = QueryFilter {
            cursor: Some("not a cursor".to_string()),
            ..QueryFilter::default()
        };
        assert!(store.query_events(&filter).unwrap_err().is_invalid_cursor());
    }

    #[test]
    fn last_event_time_tracks_newest_row() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_last_event_time().unwrap().is_none());

        let newest = base_ts() + Duration::seconds(9);
        store
            .insert_event(&new_event(base_ts(), "old", EventType::PlayerJoin))
            .unwrap();
        store
            .insert_event(&new_event(newest, "new", EventType::PlayerJoin))
            .unwrap();
        assert_eq!(store.get_last_event_time().unwrap(), Some(newest));
    }

    #[test]
    fn parse_failures_deduplicate_on_raw_line() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .insert_parse_failure("garbage line", "bad prefix", base_ts())
            .unwrap());
        assert!(!store
            .insert_parse_failure("garbage line", "bad prefix", base_ts())
            .unwrap());
    }

    #[test]
    fn meta_json_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let mut event = new_event(base_ts(), "M", EventType::PlayerJoin);
        event.meta_json = Some(serde_json::json!({"k": "v"}));
        store.insert_event(&event).unwrap();

        let result = store.query_events(&QueryFilter::default()).unwrap();
        assert_eq!(
            result.items[0].meta_json,
            Some(serde_json::json!({"k": "v"}))
        );
    }

    #[test]
    fn ping_succeeds_on_open_store() {
        let store = Store::open_in_memory().unwrap();
        store.ping().unwrap();
    }

    #[test]
    fn opens_on_disk_with_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = Store::open(&path).unwrap();
        let mode: String = store
            .connection()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
