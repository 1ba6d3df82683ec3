pub mod auth;
pub mod csrf;
pub mod headers;
pub mod limit;

pub mod ratelimit {
    use super::auth::client_ip;
    use crate::routes::error::ApiError;
    use crate::AppState;
    use axum::extract::{Request, State};
    use axum::middleware::Next;
    use axum::response::{IntoResponse, Response};

    /// Per-IP token-bucket gate; absent limiter means the surface is
    /// loopback-only and unthrottled.
    pub async fn rate_limit(
        State(state): State<AppState>,
        request: Request,
        next: Next,
    ) -> Response {
        let Some(limiter) = &state.rate_limiter else {
            return next.run(request).await;
        };
        if limiter.allow(client_ip(&request)) {
            next.run(request).await
        } else {
            ApiError::TooManyRequests(1).into_response()
        }
    }
}
