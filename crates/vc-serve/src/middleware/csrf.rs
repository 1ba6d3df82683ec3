use crate::routes::error::ApiError;
use crate::AppState;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Origin/Referer validation on state-changing methods. Loopback hosts are
/// always allowed so the local UI keeps working.
pub async fn csrf(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.csrf_enabled {
        return next.run(request).await;
    }
    if !matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::DELETE
    ) {
        return next.run(request).await;
    }

    if let Some(origin) = header_str(&request, "origin") {
        return match origin_host(origin) {
            Some(host) if is_allowed_host(&host, &state.csrf_hosts) => next.run(request).await,
            _ => ApiError::Forbidden("invalid origin".to_string()).into_response(),
        };
    }

    if let Some(referer) = header_str(&request, "referer") {
        return match origin_host(referer) {
            Some(host) if is_allowed_host(&host, &state.csrf_hosts) => next.run(request).await,
            _ => ApiError::Forbidden("invalid referer".to_string()).into_response(),
        };
    }

    // Neither header present: reject for safety.
    ApiError::Forbidden("missing origin/referer".to_string()).into_response()
}

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Host portion of an absolute URL like `http://host:port/path`.
fn origin_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let host_port = rest.split(['/', '?', '#']).next()?;
    if host_port.is_empty() {
        return None;
    }
    Some(host_port.to_string())
}

pub(crate) fn is_allowed_host(host_port: &str, allowed: &[String]) -> bool {
    let host = strip_port(host_port);
    if host == "localhost" || host == "127.0.0.1" || host == "::1" || host == "[::1]" {
        return true;
    }
    allowed
        .iter()
        .any(|candidate| strip_port(candidate) == host)
}

fn strip_port(host: &str) -> &str {
    match host.rfind(':') {
        Some(index) => &host[..index],
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_from_origin() {
        assert_eq!(
            origin_host("http://example.com:8080"),
            Some("example.com:8080".to_string())
        );
        assert_eq!(
            origin_host("https://example.com/path?q=1"),
            Some("example.com".to_string())
        );
        assert_eq!(origin_host("not a url"), None);
    }

    #[test]
    fn loopback_hosts_are_always_allowed() {
        assert!(is_allowed_host("localhost:3000", &[]));
        assert!(is_allowed_host("127.0.0.1:8737", &[]));
        assert!(is_allowed_host("localhost", &[]));
    }

    #[test]
    fn allowlist_matches_ignoring_port() {
        let allowed = vec!["192.168.1.50:8737".to_string()];
        assert!(is_allowed_host("192.168.1.50:9999", &allowed));
        assert!(!is_allowed_host("192.168.1.51:8737", &allowed));
    }
}
