use axum::http::{header::RETRY_AFTER, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;
use vc_db::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failures the HTTP surface can answer with. 5xx bodies never carry
/// internal detail; the cause is logged server-side instead.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    TooManyRequests(u64),
    ServiceUnavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message })).into_response()
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    error: "Unauthorized".to_string(),
                }),
            )
                .into_response(),
            ApiError::Forbidden(message) => (
                StatusCode::FORBIDDEN,
                Json(ErrorBody {
                    error: format!("Forbidden: {message}"),
                }),
            )
                .into_response(),
            ApiError::TooManyRequests(retry_after_secs) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ErrorBody {
                        error: "Too Many Requests".to_string(),
                    }),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
                response
            }
            ApiError::ServiceUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody { error: message }),
            )
                .into_response(),
            ApiError::Internal(detail) => {
                error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: "internal error".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_invalid_cursor() {
            ApiError::BadRequest("invalid cursor".to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}
