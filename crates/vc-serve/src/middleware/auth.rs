use crate::routes::error::ApiError;
use crate::sseauth;
use crate::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use subtle::ConstantTimeEq;
use vc_core::time::Clock;

pub const REALM_HEADER: &str = "Basic realm=\"VRClog Companion\"";

/// Hash both operands before the constant-time compare so the comparison
/// time carries no length information either.
pub(crate) fn constant_time_eq_str(a: &str, b: &str) -> bool {
    let a_hash = Sha256::digest(a.as_bytes());
    let b_hash = Sha256::digest(b.as_bytes());
    a_hash.ct_eq(&b_hash).into()
}

pub(crate) fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn parse_basic_auth(request: &Request) -> Option<(String, String)> {
    let header = request.headers().get("authorization")?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn unauthorized() -> Response {
    let mut response = ApiError::Unauthorized.into_response();
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static(REALM_HEADER),
    );
    response
}

fn locked_out(state: &AppState, ip: IpAddr) -> Option<Response> {
    let limiter = state.failure_limiter.as_ref()?;
    let now = state.clock.now();
    if !limiter.is_locked(ip, now) {
        return None;
    }
    Some(ApiError::TooManyRequests(limiter.lockout_seconds_remaining(ip, now)).into_response())
}

/// Records a failure; when it tips the counter into lockout, answers 429.
fn record_failure(state: &AppState, ip: IpAddr) -> Option<Response> {
    let limiter = state.failure_limiter.as_ref()?;
    let now = state.clock.now();
    if limiter.record_failure(ip, now) < 0 {
        return Some(
            ApiError::TooManyRequests(limiter.lockout_seconds_remaining(ip, now)).into_response(),
        );
    }
    None
}

fn credentials_match(state: &AppState, user: &str, pass: &str) -> bool {
    let Some(auth) = &state.auth else {
        return false;
    };
    // Both comparisons always run.
    let user_ok = constant_time_eq_str(user, &auth.username);
    let pass_ok = constant_time_eq_str(pass, auth.password.expose());
    user_ok && pass_ok
}

/// HTTP basic-auth gate. Blank configured credentials disable the gate.
pub async fn basic_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.auth.is_none() {
        return next.run(request).await;
    }
    let ip = client_ip(&request);

    if let Some(response) = locked_out(&state, ip) {
        return response;
    }

    match parse_basic_auth(&request) {
        Some((user, pass)) if credentials_match(&state, &user, &pass) => {
            if let Some(limiter) = &state.failure_limiter {
                limiter.record_success(ip);
            }
            next.run(request).await
        }
        _ => {
            if let Some(response) = record_failure(&state, ip) {
                return response;
            }
            unauthorized()
        }
    }
}

/// Stream variant: basic-auth, or a short-lived signed token in the `token`
/// query parameter (browser EventSource clients cannot set auth headers).
pub async fn sse_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.auth.is_none() {
        return next.run(request).await;
    }
    let ip = client_ip(&request);

    if let Some(response) = locked_out(&state, ip) {
        return response;
    }

    if let Some((user, pass)) = parse_basic_auth(&request) {
        if credentials_match(&state, &user, &pass) {
            if let Some(limiter) = &state.failure_limiter {
                limiter.record_success(ip);
            }
            return next.run(request).await;
        }
    }

    if let Some(token) = query_param(&request, "token") {
        if !state.sse_secret.is_empty()
            && sseauth::validate_token(
                &token,
                &state.sse_secret,
                sseauth::SCOPE_SSE,
                state.clock.now(),
            )
            .is_ok()
        {
            return next.run(request).await;
        }
    }

    if let Some(response) = record_failure(&state, ip) {
        return response;
    }
    unauthorized()
}

fn query_param(request: &Request, name: &str) -> Option<String> {
    let query = request.uri().query()?;
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key == name {
            return Some(percent_decode(value));
        }
    }
    None
}

/// Tokens are URL-safe base64, so only '%' and '+' need undoing.
fn percent_decode(value: &str) -> String {
    let mut out = Vec::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'%' if index + 2 < bytes.len() => {
                let hex = &value[index + 1..index + 3];
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        index += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        index += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                index += 1;
            }
            byte => {
                out.push(byte);
                index += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
