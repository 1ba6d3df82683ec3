use crate::event::{Event, EventType};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct WorldInfo {
    pub world_id: String,
    pub world_name: String,
    pub instance_id: String,
    #[serde(with = "crate::time::serde_canonical")]
    #[schema(value_type = String)]
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlayerInfo {
    pub player_name: String,
    pub player_id: String,
    #[serde(with = "crate::time::serde_canonical")]
    #[schema(value_type = String)]
    pub joined_at: DateTime<Utc>,
}

/// State change worth surfacing downstream (notifier, UI).
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedEvent {
    WorldChanged {
        prev_world: Option<WorldInfo>,
        event: Event,
    },
    PlayerJoined {
        event: Event,
    },
    PlayerLeft {
        event: Event,
    },
}

impl DerivedEvent {
    pub fn event(&self) -> &Event {
        match self {
            DerivedEvent::WorldChanged { event, .. }
            | DerivedEvent::PlayerJoined { event }
            | DerivedEvent::PlayerLeft { event } => event,
        }
    }
}

#[derive(Default)]
struct Inner {
    current_world: Option<WorldInfo>,
    players: HashMap<String, PlayerInfo>,
}

/// In-memory "what world am I in, who is here" projection of the event
/// stream. Mutated only from the ingest on-insert hook; read from HTTP
/// handlers. Not persisted; the replay window repopulates it on restart.
#[derive(Default)]
pub struct DeriveState {
    inner: RwLock<Inner>,
}

impl DeriveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns the resulting change, or None when the event
    /// does not alter the projection (duplicate join, unknown leave, missing
    /// player key).
    pub fn update(&self, event: &Event) -> Option<DerivedEvent> {
        let mut inner = self.inner.write();
        match event.event_type {
            EventType::WorldJoin => {
                let prev = inner.current_world.take();
                inner.current_world = Some(WorldInfo {
                    world_id: event.world_id.clone().unwrap_or_default(),
                    world_name: event.world_name.clone().unwrap_or_default(),
                    instance_id: event.instance_id.clone().unwrap_or_default(),
                    joined_at: event.ts,
                });
                // Player membership is scoped to the world session.
                inner.players.clear();
                Some(DerivedEvent::WorldChanged {
                    prev_world: prev,
                    event: event.clone(),
                })
            }
            EventType::PlayerJoin => {
                let key = event.player_key();
                if key.is_empty() || inner.players.contains_key(key) {
                    return None;
                }
                inner.players.insert(
                    key.to_string(),
                    PlayerInfo {
                        player_name: event.player_name.clone().unwrap_or_default(),
                        player_id: event.player_id.clone().unwrap_or_default(),
                        joined_at: event.ts,
                    },
                );
                Some(DerivedEvent::PlayerJoined {
                    event: event.clone(),
                })
            }
            EventType::PlayerLeft => {
                let key = event.player_key();
                if key.is_empty() || inner.players.remove(key).is_none() {
                    return None;
                }
                Some(DerivedEvent::PlayerLeft {
                    event: event.clone(),
                })
            }
        }
    }

    pub fn current_world(&self) -> Option<WorldInfo> {
        self.inner.read().current_world.clone()
    }

    pub fn current_players(&self) -> Vec<PlayerInfo> {
        self.inner.read().players.values().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.inner.read().players.len()
    }
}
