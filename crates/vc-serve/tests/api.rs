use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tower::ServiceExt;
use vc_core::derive::DeriveState;
use vc_core::event::EventType;
use vc_core::secrets::Secret;
use vc_core::time::ManualClock;
use vc_db::store::{sha256_hex, NewEvent};
use vc_db::{encode_cursor, Store};
use vc_serve::hub::{Hub, HubConfig};
use vc_serve::middleware::limit::{
    AuthFailureLimiter, AuthFailureLimiterConfig, RateLimiter, RateLimiterConfig,
};
use vc_serve::{app, AppState};

struct TestEnv {
    state: AppState,
    clock: ManualClock,
    _dir: tempfile::TempDir,
}

fn base_ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap()
}

fn test_env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let db_path: PathBuf = dir.path().join("events.db");
    // Create the schema up front.
    Store::open(&db_path).unwrap();

    let (hub, runner) = Hub::new(HubConfig::default());
    tokio::spawn(runner.run());

    let clock = ManualClock::new(base_ts());
    let state = AppState {
        db_path,
        config_path: dir.path().join("config.json"),
        hub,
        derive: Arc::new(DeriveState::new()),
        notifier: None,
        clock: Arc::new(clock.clone()),
        version: "test".to_string(),
        webhook_configured: false,
        auth: None,
        sse_secret: Vec::new(),
        rate_limiter: None,
        failure_limiter: None,
        csrf_enabled: false,
        csrf_hosts: Vec::new(),
    };

    TestEnv {
        state,
        clock,
        _dir: dir,
    }
}

fn insert_event(state: &AppState, ts: DateTime<Utc>, raw: &str, event_type: EventType) -> i64 {
    let store = Store::open(&state.db_path).unwrap();
    let (id, inserted) = store
        .insert_event(&NewEvent {
            ts,
            event_type,
            player_name: Some("Alice".to_string()),
            player_id: Some("usr_a".to_string()),
            world_id: None,
            world_name: None,
            instance_id: None,
            meta_json: None,
            dedupe_key: sha256_hex(raw),
            ingested_at: ts,
        })
        .unwrap();
    assert!(inserted);
    id
}

fn basic_header(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(state: &AppState, uri: &str) -> axum::response::Response {
    app(state.clone())
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_authed(state: &AppState, uri: &str, auth: &str) -> axum::response::Response {
    app(state.clone())
        .oneshot(
            Request::get(uri)
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_components_and_security_headers() {
    let env = test_env();
    let response = get(&env.state, "/api/v1/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert!(response.headers().contains_key("content-security-policy"));

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], "test");
    assert_eq!(json["components"]["database"]["status"], "healthy");
    assert_eq!(json["components"]["webhook"]["status"], "unconfigured");
}

#[tokio::test]
async fn events_returns_empty_array_not_null() {
    let env = test_env();
    let response = get(&env.state, "/api/v1/events").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["items"].as_array().unwrap().is_empty());
    assert!(json.get("next_cursor").is_none());
}

#[tokio::test]
async fn events_rejects_invalid_parameters() {
    let env = test_env();
    for uri in [
        "/api/v1/events?type=world_leave",
        "/api/v1/events?since=yesterday",
        "/api/v1/events?limit=0",
        "/api/v1/events?cursor=%21%21%21",
        "/api/v1/events?order=sideways",
    ] {
        let response = get(&env.state, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let json = body_json(response).await;
        assert!(json["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn events_pages_with_cursor_without_gaps() {
    let env = test_env();
    for i in 0..10 {
        insert_event(
            &env.state,
            base_ts() + Duration::seconds(i),
            &format!("L{i}"),
            EventType::PlayerJoin,
        );
    }

    let response = get(&env.state, "/api/v1/events?limit=3").await;
    let json = body_json(response).await;
    let ids: Vec<i64> = json["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let expected_cursor = encode_cursor(&(base_ts() + Duration::seconds(2)), 3);
    assert_eq!(json["next_cursor"], expected_cursor.as_str());

    let mut seen = ids;
    let mut cursor = expected_cursor;
    loop {
        let response = get(
            &env.state,
            &format!("/api/v1/events?limit=3&cursor={cursor}"),
        )
        .await;
        let json = body_json(response).await;
        for item in json["items"].as_array().unwrap() {
            seen.push(item["id"].as_i64().unwrap());
        }
        match json.get("next_cursor").and_then(|value| value.as_str()) {
            Some(next) => cursor = next.to_string(),
            None => break,
        }
    }
    assert_eq!(seen, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn now_reflects_derive_state() {
    let env = test_env();
    env.state.derive.update(&vc_core::event::Event {
        id: 1,
        ts: base_ts(),
        event_type: EventType::WorldJoin,
        player_name: None,
        player_id: None,
        world_id: Some("wrld_1".to_string()),
        world_name: Some("Test World".to_string()),
        instance_id: Some("12345".to_string()),
        meta_json: None,
        dedupe_key: "w".to_string(),
        ingested_at: base_ts(),
        schema_version: 1,
    });

    let response = get(&env.state, "/api/v1/now").await;
    let json = body_json(response).await;
    assert_eq!(json["world"]["world_name"], "Test World");
    assert!(json["players"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn stats_counts_todays_events() {
    let env = test_env();
    // "Today" is evaluated in local time at request time, so stamp now.
    let now = Utc::now();
    insert_event(&env.state, now, "j1", EventType::PlayerJoin);
    insert_event(&env.state, now, "j2", EventType::PlayerLeft);

    let response = get(&env.state, "/api/v1/stats/basic").await;
    let json = body_json(response).await;
    assert_eq!(json["today_joins"], 1);
    assert_eq!(json["today_leaves"], 1);
    assert_eq!(json["today_world_changes"], 0);
    assert_eq!(json["recent_players"][0], "Alice");
    assert!(json["last_event_at"].is_string());
}

#[tokio::test]
async fn protected_routes_require_basic_auth() {
    let mut env = test_env();
    env.state = env
        .state
        .with_basic_auth("admin", Secret::new("correct-horse"));

    let response = get(&env.state, "/api/v1/events").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Basic realm=\"VRClog Companion\""
    );

    let response = get_authed(
        &env.state,
        "/api/v1/events",
        &basic_header("admin", "wrong"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get_authed(
        &env.state,
        "/api/v1/events",
        &basic_header("admin", "correct-horse"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Health stays open.
    let response = get(&env.state, "/api/v1/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_failure_lockout_then_recovery() {
    let mut env = test_env();
    env.state = env
        .state
        .with_basic_auth("admin", Secret::new("correct-horse"));
    env.state.failure_limiter = Some(Arc::new(AuthFailureLimiter::new(
        AuthFailureLimiterConfig {
            max_failures: 2,
            window: StdDuration::from_secs(60),
            lockout: StdDuration::from_secs(30),
        },
    )));

    // First wrong password: plain 401.
    let response = get_authed(
        &env.state,
        "/api/v1/events",
        &basic_header("admin", "wrong"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Second wrong password trips the lockout.
    let response = get_authed(
        &env.state,
        "/api/v1/events",
        &basic_header("admin", "wrong"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // Correct password during lockout is still rejected.
    let response = get_authed(
        &env.state,
        "/api/v1/events",
        &basic_header("admin", "correct-horse"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // After the lockout expires the correct password works again.
    env.clock.advance(Duration::seconds(31));
    let response = get_authed(
        &env.state,
        "/api/v1/events",
        &basic_header("admin", "correct-horse"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn token_issuance_and_stream_token_auth() {
    let mut env = test_env();
    env.state = env
        .state
        .with_basic_auth("admin", Secret::new("correct-horse"));
    env.state.sse_secret = b"stream-secret".to_vec();

    // Token endpoint requires basic auth.
    let response = app(env.state.clone())
        .oneshot(
            Request::post("/api/v1/auth/token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(env.state.clone())
        .oneshot(
            Request::post("/api/v1/auth/token")
                .header(
                    header::AUTHORIZATION,
                    basic_header("admin", "correct-horse"),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let token = json["token"].as_str().unwrap().to_string();
    assert_eq!(json["expires_in"], 300);
    assert!(token.starts_with("sse1."));

    // Stream accepts the token as a query parameter.
    let response = get(&env.state, &format!("/api/v1/stream?token={token}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // Garbage token is rejected.
    let response = get(&env.state, "/api/v1/stream?token=sse1.bogus.bogus").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stream_replays_missed_events_in_order() {
    let env = test_env();
    let ts = base_ts();
    let id_a = insert_event(&env.state, ts, "A", EventType::PlayerJoin);
    insert_event(&env.state, ts, "B", EventType::PlayerJoin);
    insert_event(&env.state, ts + Duration::seconds(1), "C", EventType::PlayerJoin);

    let cursor_a = encode_cursor(&ts, id_a);
    let response = app(env.state.clone())
        .oneshot(
            Request::get("/api/v1/stream")
                .header("last-event-id", &cursor_a)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body_stream = response.into_body().into_data_stream();
    let mut collected = String::new();
    while collected.matches("event:").count() < 2 {
        let chunk = tokio::time::timeout(StdDuration::from_secs(2), body_stream.next())
            .await
            .expect("timed out reading stream")
            .expect("stream ended early")
            .expect("body error");
        collected.push_str(std::str::from_utf8(&chunk).unwrap());
    }

    let id_b = encode_cursor(&ts, 2);
    let id_c = encode_cursor(&(ts + Duration::seconds(1)), 3);
    let pos_b = collected.find(&id_b).expect("B frame missing");
    let pos_c = collected.find(&id_c).expect("C frame missing");
    assert!(pos_b < pos_c);
    assert!(!collected.contains(&cursor_a));
    assert!(collected.contains(": connected"));
}

#[tokio::test]
async fn stream_ignores_invalid_last_event_id() {
    let env = test_env();
    insert_event(&env.state, base_ts(), "A", EventType::PlayerJoin);

    let response = app(env.state.clone())
        .oneshot(
            Request::get("/api/v1/stream?last_event_id=%21broken%21")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    // No replay, but the stream still opens.
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn csrf_blocks_cross_site_writes() {
    let mut env = test_env();
    env.state.csrf_enabled = true;
    env.state.csrf_hosts = vec!["192.168.1.50:8737".to_string()];

    let config_body = serde_json::to_string(&vc_core::config::Config::default()).unwrap();

    // Missing Origin and Referer.
    let response = app(env.state.clone())
        .oneshot(
            Request::put("/api/v1/config")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(config_body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Disallowed origin.
    let response = app(env.state.clone())
        .oneshot(
            Request::put("/api/v1/config")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ORIGIN, "http://evil.example.com")
                .body(Body::from(config_body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Loopback origin passes; reads are exempt either way.
    let response = app(env.state.clone())
        .oneshot(
            Request::put("/api/v1/config")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ORIGIN, "http://localhost:8737")
                .body(Body::from(config_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&env.state, "/api/v1/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_limiter_throttles_bursts() {
    let mut env = test_env();
    env.state.rate_limiter = Some(Arc::new(RateLimiter::new(RateLimiterConfig {
        rate: 1.0,
        burst: 2,
        cleanup_interval: StdDuration::from_secs(300),
    })));

    let first = get(&env.state, "/api/v1/health").await;
    let second = get(&env.state, "/api/v1/health").await;
    let third = get(&env.state, "/api/v1/health").await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(third.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn config_round_trips_through_the_api() {
    let env = test_env();

    let response = get(&env.state, "/api/v1/config").await;
    assert_eq!(response.status(), StatusCode::OK);
    let defaults = body_json(response).await;
    assert_eq!(defaults["schema_version"], 1);

    let mut config = vc_core::config::Config::default();
    config.port = 9999;
    config.notify_on_leave = false;
    let response = app(env.state.clone())
        .oneshot(
            Request::put("/api/v1/config")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&config).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&env.state, "/api/v1/config").await;
    let json = body_json(response).await;
    assert_eq!(json["port"], 9999);
    assert_eq!(json["notify_on_leave"], false);
}
