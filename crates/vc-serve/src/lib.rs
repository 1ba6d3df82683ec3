pub mod hub;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod sseauth;

use crate::hub::Hub;
use crate::middleware::limit::{AuthFailureLimiter, RateLimiter};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use vc_core::derive::DeriveState;
use vc_core::secrets::Secret;
use vc_core::time::Clock;
use vc_db::{Store, StoreError};
use vc_notify::Notifier;

#[derive(Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: Secret,
}

/// Shared state for the HTTP surface. Handlers open their own short-lived
/// store connections against `db_path`; WAL mode keeps readers concurrent
/// with the ingest writer.
#[derive(Clone)]
pub struct AppState {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub hub: Hub,
    pub derive: Arc<DeriveState>,
    pub notifier: Option<Notifier>,
    pub clock: Arc<dyn Clock>,
    pub version: String,
    pub webhook_configured: bool,
    /// None disables authentication (loopback-only deployments).
    pub auth: Option<AuthConfig>,
    pub sse_secret: Vec<u8>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub failure_limiter: Option<Arc<AuthFailureLimiter>>,
    pub csrf_enabled: bool,
    pub csrf_hosts: Vec<String>,
}

impl AppState {
    /// Blank username or password disables the auth gate entirely.
    pub fn with_basic_auth(mut self, username: &str, password: Secret) -> Self {
        if !username.is_empty() && !password.is_empty() {
            self.auth = Some(AuthConfig {
                username: username.to_string(),
                password,
            });
        }
        self
    }
}

pub fn open_store(state: &AppState) -> Result<Store, StoreError> {
    Store::open(&state.db_path)
}

pub fn app(state: AppState) -> Router {
    routes::router(state)
}

/// Bind and serve until the shutdown signal fires. Stream responses have no
/// write timeout by construction (axum/hyper impose none).
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http server listening");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })
    .await
}
