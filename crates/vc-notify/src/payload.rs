use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use vc_core::derive::DerivedEvent;

pub const COLOR_GREEN: u32 = 0x00FF00;
pub const COLOR_RED: u32 = 0xFF0000;
pub const COLOR_BLUE: u32 = 0x5865F2;

/// Webhook APIs cap embeds per message; overflow splits into extra payloads.
pub const MAX_EMBEDS_PER_MESSAGE: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embeds: Vec<WebhookEmbed>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEmbed {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    #[serde(skip_serializing_if = "is_zero", default)]
    pub color: u32,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub timestamp: String,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Shape a batch into embeds: one per world change, one aggregated embed for
/// all joins, one for all leaves.
pub fn build_payloads(events: &[DerivedEvent]) -> Vec<WebhookPayload> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut world_changes = Vec::new();
    let mut joins = Vec::new();
    let mut leaves = Vec::new();

    for event in events {
        match event {
            DerivedEvent::WorldChanged { .. } => world_changes.push(event),
            DerivedEvent::PlayerJoined { .. } => joins.push(event),
            DerivedEvent::PlayerLeft { .. } => leaves.push(event),
        }
    }

    let mut embeds = Vec::new();
    for change in world_changes {
        embeds.push(build_world_embed(change));
    }
    if !joins.is_empty() {
        embeds.push(build_players_embed(&joins, "Player Joined", "joined", COLOR_GREEN));
    }
    if !leaves.is_empty() {
        embeds.push(build_players_embed(&leaves, "Player Left", "left", COLOR_RED));
    }

    embeds
        .chunks(MAX_EMBEDS_PER_MESSAGE)
        .map(|chunk| WebhookPayload {
            content: String::new(),
            embeds: chunk.to_vec(),
        })
        .collect()
}

fn embed_timestamp(event: &DerivedEvent) -> String {
    event
        .event()
        .ts
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn build_world_embed(change: &DerivedEvent) -> WebhookEmbed {
    let event = change.event();
    let world_name = event
        .world_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or("Unknown World");

    let mut description = format!("Joined **{world_name}**");
    if let Some(instance) = event.instance_id.as_deref().filter(|i| !i.is_empty()) {
        description.push_str(&format!("\nInstance: `{instance}`"));
    }

    WebhookEmbed {
        title: "World Changed".to_string(),
        description,
        color: COLOR_BLUE,
        timestamp: embed_timestamp(change),
    }
}

fn build_players_embed(
    events: &[&DerivedEvent],
    title: &str,
    verb: &str,
    color: u32,
) -> WebhookEmbed {
    let names: Vec<&str> = events
        .iter()
        .map(|event| event.event().player_name.as_deref().unwrap_or(""))
        .collect();

    let description = if names.len() == 1 {
        format!("**{}** {verb}", names[0])
    } else {
        format!("**{} players** {verb}: {}", names.len(), names.join(", "))
    };

    WebhookEmbed {
        title: title.to_string(),
        description,
        color,
        timestamp: embed_timestamp(events[events.len() - 1]),
    }
}
