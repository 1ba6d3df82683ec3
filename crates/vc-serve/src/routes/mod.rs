pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod now;
pub mod stats;
pub mod stream;

use crate::middleware::csrf::csrf;
use crate::middleware::headers::security_headers;
use crate::middleware::ratelimit::rate_limit;
use crate::{openapi, AppState};
use axum::middleware;
use axum::Router;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(health::router(state.clone()))
        .merge(events::router(state.clone()))
        .merge(stream::router(state.clone()))
        .merge(now::router(state.clone()))
        .merge(stats::router(state.clone()))
        .merge(auth::router(state.clone()))
        .merge(config::router(state.clone()))
        .merge(openapi::router());

    Router::new()
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(state, csrf))
        .layer(middleware::from_fn(security_headers))
}
