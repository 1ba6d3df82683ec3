use crate::hub::Subscriber;
use crate::middleware::auth::sse_auth;
use crate::{open_store, AppState};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::middleware;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use utoipa::IntoParams;
use vc_core::event::Event;
use vc_db::{encode_cursor, QueryFilter, QueryOrder};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const REPLAY_PAGE_SIZE: usize = 100;
const REPLAY_MAX_PAGES: usize = 5;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct StreamQuery {
    pub last_event_id: Option<String>,
    #[allow(dead_code)]
    pub token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), sse_auth))
        .with_state(state)
}

/// Server-sent events: bounded replay from `Last-Event-ID`, then live events
/// from the hub, with comment-frame heartbeats.
#[utoipa::path(
    get,
    path = "/api/v1/stream",
    params(StreamQuery),
    responses((status = 200, description = "text/event-stream of events"))
)]
pub(crate) async fn stream_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Response {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .filter(|value| !value.is_empty())
        .or_else(|| query.last_event_id.clone().filter(|value| !value.is_empty()));

    let missed = match last_event_id {
        Some(cursor) => collect_missed_events(&state, cursor),
        None => Vec::new(),
    };

    // Subscribe before emitting the replay so no event published meanwhile
    // is missed entirely (duplicates are cheaper than gaps).
    let subscriber = state.hub.subscribe();

    let connected = stream::once(async {
        Ok::<SseEvent, Infallible>(SseEvent::default().comment("connected"))
    });
    let replay = stream::iter(
        missed
            .into_iter()
            .map(|event| Ok::<SseEvent, Infallible>(sse_frame(&event))),
    );
    let live = live_stream(subscriber);

    Sse::new(connected.chain(replay).chain(live))
        .keep_alive(
            KeepAlive::new()
                .interval(HEARTBEAT_INTERVAL)
                .text(""),
        )
        .into_response()
}

/// Best-effort bounded replay: up to 5 ascending pages of 100. Invalid
/// cursors and storage errors skip replay rather than failing the stream.
fn collect_missed_events(state: &AppState, cursor: String) -> Vec<Event> {
    let Ok(store) = open_store(state) else {
        return Vec::new();
    };

    let mut collected = Vec::new();
    let mut cursor = Some(cursor);

    for _ in 0..REPLAY_MAX_PAGES {
        let filter = QueryFilter {
            cursor: cursor.clone(),
            limit: Some(REPLAY_PAGE_SIZE),
            order: QueryOrder::Asc,
            ..QueryFilter::default()
        };
        match store.query_events(&filter) {
            Ok(result) => {
                collected.extend(result.items);
                match result.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            Err(_) => break,
        }
    }

    collected
}

fn live_stream(subscriber: Subscriber) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream::unfold(subscriber, |mut subscriber| async move {
        subscriber
            .recv()
            .await
            .map(|event| (Ok(sse_frame(&event)), subscriber))
    })
}

/// `id:` carries the cursor of `(ts, id)` so a reconnect resumes exactly at
/// the last delivered boundary.
fn sse_frame(event: &Event) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default()
        .id(encode_cursor(&event.ts, event.id))
        .event(event.event_type.as_str())
        .data(data)
}
