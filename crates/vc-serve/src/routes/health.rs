use crate::{open_store, AppState};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

pub const STATUS_HEALTHY: &str = "healthy";
pub const STATUS_DEGRADED: &str = "degraded";
pub const STATUS_UNHEALTHY: &str = "unhealthy";

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses((status = 200, body = HealthResponse))
)]
pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut components = BTreeMap::new();
    let mut status = STATUS_HEALTHY;

    match open_store(&state).and_then(|store| store.ping()) {
        Ok(()) => {
            components.insert(
                "database".to_string(),
                ComponentHealth {
                    status: STATUS_HEALTHY.to_string(),
                    message: String::new(),
                },
            );
        }
        Err(_) => {
            components.insert(
                "database".to_string(),
                ComponentHealth {
                    status: STATUS_UNHEALTHY.to_string(),
                    message: "database connection failed".to_string(),
                },
            );
            status = STATUS_DEGRADED;
        }
    }

    if state.webhook_configured {
        let notifier_disabled = state
            .notifier
            .as_ref()
            .map(|notifier| notifier.status().disabled)
            .unwrap_or(false);
        components.insert(
            "webhook".to_string(),
            ComponentHealth {
                status: if notifier_disabled {
                    STATUS_UNHEALTHY.to_string()
                } else {
                    STATUS_HEALTHY.to_string()
                },
                message: if notifier_disabled {
                    state
                        .notifier
                        .as_ref()
                        .map(|notifier| notifier.status().disabled_reason)
                        .unwrap_or_default()
                } else {
                    String::new()
                },
            },
        );
    } else {
        components.insert(
            "webhook".to_string(),
            ComponentHealth {
                status: "unconfigured".to_string(),
                message: "webhook not configured".to_string(),
            },
        );
    }

    Json(HealthResponse {
        status: status.to_string(),
        version: state.version.clone(),
        components,
    })
}
