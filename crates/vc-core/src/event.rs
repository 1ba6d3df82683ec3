use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Canonical stored event. Created once on insert, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    pub id: i64,
    #[serde(with = "crate::time::serde_canonical")]
    #[schema(value_type = String)]
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub meta_json: Option<Value>,
    pub dedupe_key: String,
    #[serde(with = "crate::time::serde_canonical")]
    #[schema(value_type = String)]
    pub ingested_at: DateTime<Utc>,
    pub schema_version: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PlayerJoin,
    PlayerLeft,
    WorldJoin,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PlayerJoin => "player_join",
            EventType::PlayerLeft => "player_left",
            EventType::WorldJoin => "world_join",
        }
    }

    pub fn parse(value: &str) -> Option<EventType> {
        match value {
            "player_join" => Some(EventType::PlayerJoin),
            "player_left" => Some(EventType::PlayerLeft),
            "world_join" => Some(EventType::WorldJoin),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn deref_or_empty(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

impl Event {
    /// Key used for player identity: stable id when known, display name
    /// otherwise.
    pub fn player_key(&self) -> &str {
        let id = deref_or_empty(&self.player_id);
        if !id.is_empty() {
            return id;
        }
        deref_or_empty(&self.player_name)
    }
}
