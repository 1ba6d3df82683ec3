use crate::middleware::auth::basic_auth;
use crate::routes::error::ApiError;
use crate::{open_store, AppState};
use axum::extract::{Query, State};
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use vc_core::event::{Event, EventType};
use vc_db::{QueryFilter, QueryOrder};

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
pub struct EventsQuery {
    pub since: Option<String>,
    pub until: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventsResponse {
    pub items: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(list_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/v1/events",
    params(EventsQuery),
    responses(
        (status = 200, body = EventsResponse),
        (status = 400, description = "invalid filter or cursor")
    )
)]
pub(crate) async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let filter = parse_filter(&query)?;
    let store = open_store(&state)?;
    let result = store.query_events(&filter)?;

    Ok(Json(EventsResponse {
        items: result.items,
        next_cursor: result.next_cursor,
    }))
}

fn parse_filter(query: &EventsQuery) -> Result<QueryFilter, ApiError> {
    let mut filter = QueryFilter::default();

    if let Some(since) = query.since.as_deref().filter(|v| !v.is_empty()) {
        filter.since = Some(parse_rfc3339(since, "since")?);
    }
    if let Some(until) = query.until.as_deref().filter(|v| !v.is_empty()) {
        filter.until = Some(parse_rfc3339(until, "until")?);
    }
    if let Some(event_type) = query.event_type.as_deref().filter(|v| !v.is_empty()) {
        filter.event_type = Some(
            EventType::parse(event_type)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid type: {event_type}")))?,
        );
    }
    if let Some(limit) = query.limit {
        if limit < 1 {
            return Err(ApiError::BadRequest(format!("invalid limit: {limit}")));
        }
        filter.limit = Some(limit as usize);
    }
    if let Some(cursor) = query.cursor.as_deref().filter(|v| !v.is_empty()) {
        filter.cursor = Some(cursor.to_string());
    }
    if let Some(order) = query.order.as_deref().filter(|v| !v.is_empty()) {
        filter.order = match order {
            "asc" => QueryOrder::Asc,
            "desc" => QueryOrder::Desc,
            other => return Err(ApiError::BadRequest(format!("invalid order: {other}"))),
        };
    }

    Ok(filter)
}

fn parse_rfc3339(value: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("invalid {field}: {value}")))
}
