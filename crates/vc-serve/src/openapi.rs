use crate::routes::auth::TokenResponse;
use crate::routes::events::{EventsQuery, EventsResponse};
use crate::routes::health::{ComponentHealth, HealthResponse};
use crate::routes::now::NowResponse;
use crate::routes::stats::StatsResponse;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;
use vc_core::config::Config;
use vc_core::derive::{PlayerInfo, WorldInfo};
use vc_core::event::{Event, EventType};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health,
        crate::routes::events::list_events,
        crate::routes::stream::stream_events,
        crate::routes::now::now,
        crate::routes::stats::basic_stats,
        crate::routes::auth::issue_token,
        crate::routes::config::get_config,
        crate::routes::config::put_config
    ),
    components(schemas(
        Event,
        EventType,
        EventsQuery,
        EventsResponse,
        HealthResponse,
        ComponentHealth,
        NowResponse,
        WorldInfo,
        PlayerInfo,
        StatsResponse,
        TokenResponse,
        Config
    ))
)]
struct ApiDoc;

pub fn generate_spec() -> String {
    ApiDoc::openapi()
        .to_json()
        .unwrap_or_else(|_| "{}".to_string())
}

pub fn router() -> Router {
    Router::new()
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(docs))
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

async fn docs() -> impl IntoResponse {
    let html = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>VRClog Companion API Docs</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
  </head>
  <body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
      window.ui = SwaggerUIBundle({ url: '/api/v1/openapi.json', dom_id: '#swagger-ui' });
    </script>
  </body>
</html>
"#;
    axum::response::Html(html)
}
