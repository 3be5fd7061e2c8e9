//! Integration tests: engine behaviour against the in-memory store, the HTTP
//! router, and a Redis smoke test.
//!
//! Run with `cargo test`. The Redis test needs a server; set
//! `TEST_REDIS_URL` (e.g. redis://127.0.0.1:6379) or it is skipped.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use presence_engine::repositories::{Family, MemorySource, RedisSource, StatePath};
use presence_engine::services::{Clock, ManualClock, PresenceEngine, SystemClock};
use presence_engine::{create_app, AppState, Config, Presence, PresenceState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

const T: i64 = 1_700_000_000_000;

struct Harness {
    source: Arc<MemorySource>,
    clock: Arc<ManualClock>,
    engine: PresenceEngine,
}

async fn harness_with(config: Config, prepare: impl FnOnce(&MemorySource)) -> Harness {
    let source = Arc::new(MemorySource::new());
    prepare(&source);
    let clock = Arc::new(ManualClock::new(T));
    let engine = PresenceEngine::start(source.clone(), clock.clone(), &config).await;
    settle().await;
    Harness {
        source,
        clock,
        engine,
    }
}

async fn harness() -> Harness {
    harness_with(Config::default(), |_| {}).await
}

/// Let spawned subscription pumps run.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn online_at(ts: i64) -> serde_json::Value {
    json!({ "online": true, "lastSeen": ts })
}

#[tokio::test]
async fn root_push_is_visible_to_queries() {
    let h = harness().await;
    h.source.set(Family::Presence, "u1", Some(online_at(T)));
    settle().await;

    let p = h.engine.get_presence("u1");
    assert_eq!(p.state, PresenceState::Online);
    assert_eq!(p.last_seen, T);
    assert!(p.online);
    assert!(!p.typing);
}

#[tokio::test]
async fn decay_without_push_moves_online_to_away() {
    let h = harness().await;
    h.source.set(Family::Presence, "u1", Some(online_at(T)));
    settle().await;

    h.clock.set(T + 10_000);
    assert_eq!(h.engine.decay_tick(), 0);
    assert_eq!(h.engine.get_presence("u1").state, PresenceState::Online);

    h.clock.set(T + 310_000);
    assert_eq!(h.engine.decay_tick(), 1);
    assert_eq!(h.engine.get_presence("u1").state, PresenceState::Away);
}

#[tokio::test(start_paused = true)]
async fn decay_timer_runs_on_its_own() {
    let h = harness().await;
    h.source.set(Family::Presence, "u1", Some(online_at(T)));
    settle().await;
    let mut updates = h.engine.updates();
    let _ = updates.borrow_and_update();

    h.clock.set(T + 310_000);
    tokio::time::advance(Duration::from_secs(30)).await;
    settle().await;

    assert!(updates.has_changed().unwrap());
    assert_eq!(h.engine.get_presence("u1").state, PresenceState::Away);
}

#[tokio::test]
async fn typing_overrides_away() {
    let h = harness().await;
    h.source.set(Family::Presence, "u1", Some(online_at(T)));
    settle().await;
    h.clock.set(T + 310_000);
    h.engine.decay_tick();
    assert_eq!(h.engine.get_presence("u1").state, PresenceState::Away);

    h.source.set_root(Family::Typing, json!({ "u1": { "typing": true } }));
    settle().await;

    let p = h.engine.get_presence("u1");
    assert_eq!(p.state, PresenceState::Online);
    assert!(p.typing);
}

#[tokio::test]
async fn typing_implies_online_even_when_flag_is_off() {
    let h = harness().await;
    h.source.set(Family::Presence, "u1", Some(json!({ "online": false, "lastSeen": 0 })));
    h.source.set(Family::Typing, "u1", Some(json!({ "typing": true })));
    settle().await;

    let p = h.engine.get_presence("u1");
    assert_eq!(p.state, PresenceState::Online);
    assert!(!p.online);
    assert!(p.typing);
}

#[tokio::test]
async fn unknown_uid_is_offline_and_opens_one_watch() {
    let h = harness().await;
    let rev = h.engine.revision();

    let p = h.engine.get_presence("u2");
    assert_eq!(p, Presence { state: PresenceState::Offline, last_seen: 0, online: false, typing: false });
    settle().await;

    assert_eq!(h.engine.fallback_watch_count(), 1);
    assert_eq!(h.source.subscribe_calls(&StatePath::user(Family::Presence, "u2")), 1);
    assert_eq!(h.engine.revision(), rev);
}

#[tokio::test]
async fn many_calls_before_resolution_open_one_watch() {
    let h = harness().await;
    for _ in 0..25 {
        h.engine.get_presence("u3");
    }
    settle().await;
    for _ in 0..25 {
        h.engine.get_presence("u3");
    }

    assert_eq!(h.source.subscribe_calls(&StatePath::user(Family::Presence, "u3")), 1);
    assert_eq!(h.source.subscribe_calls(&StatePath::user(Family::Typing, "u3")), 1);
}

#[tokio::test]
async fn repeated_queries_are_stable() {
    let h = harness().await;
    h.source.set(Family::Presence, "u1", Some(online_at(T - 5_000)));
    settle().await;

    let first = h.engine.get_presence("u1");
    let second = h.engine.get_presence("u1");
    assert_eq!(first, second);
}

#[tokio::test]
async fn self_is_online_before_first_push() {
    let config = Config {
        self_uid: Some("me".to_string()),
        ..Config::default()
    };
    let h = harness_with(config, |_| {}).await;

    let p = h.engine.get_presence("me");
    assert_eq!(p.state, PresenceState::Online);
    assert_eq!(p.last_seen, h.clock.now_ms());
    assert!(p.online);
}

#[tokio::test]
async fn blank_uid_has_no_side_effects() {
    let h = harness().await;
    assert_eq!(h.engine.get_presence(""), Presence::offline());
    assert_eq!(h.engine.get_presence("   "), Presence::offline());
    settle().await;
    assert_eq!(h.engine.fallback_watch_count(), 0);
}

#[tokio::test]
async fn denied_roots_fall_back_to_per_user_watches() {
    let h = harness_with(Config::default(), |source| {
        source.deny(StatePath::root(Family::Presence));
        source.deny(StatePath::root(Family::Typing));
        source.set(Family::Presence, "u1", Some(online_at(T)));
    })
    .await;

    assert_eq!(h.engine.get_presence("u1").state, PresenceState::Offline);
    settle().await;
    assert_eq!(h.engine.get_presence("u1").state, PresenceState::Online);

    h.source.set(Family::Typing, "u1", Some(json!({ "typing": true })));
    settle().await;
    assert!(h.engine.get_presence("u1").typing);
    let typing = h.engine.get_all_typing();
    assert_eq!(typing.len(), 1);
    assert_eq!(typing[0].uid, "u1");
    assert_eq!(typing[0].last_seen, T);
}

#[tokio::test]
async fn silent_roots_are_covered_by_fallback() {
    let h = harness_with(Config::default(), |source| {
        source.stall(StatePath::root(Family::Presence));
        source.stall(StatePath::root(Family::Typing));
        source.set(Family::Presence, "u1", Some(online_at(T)));
        source.set(Family::Typing, "u1", Some(json!({ "typing": true })));
    })
    .await;

    h.engine.get_presence("u1");
    settle().await;
    let p = h.engine.get_presence("u1");
    assert!(p.typing);
    assert_eq!(p.last_seen, T);
}

#[tokio::test]
async fn malformed_records_classify_offline() {
    let h = harness().await;
    h.source.set_root(
        Family::Presence,
        json!({ "u1": { "online": false, "lastSeen": "a while ago" }, "u2": 17 }),
    );
    settle().await;

    assert_eq!(h.engine.get_presence("u1").state, PresenceState::Offline);
    assert_eq!(h.engine.get_presence("u1").last_seen, 0);
    assert_eq!(h.engine.get_presence("u2").state, PresenceState::Offline);
}

#[tokio::test]
async fn typing_list_excludes_self_and_orders_by_recency() {
    let config = Config {
        self_uid: Some("me".to_string()),
        ..Config::default()
    };
    let h = harness_with(config, |source| {
        source.set_root(
            Family::Presence,
            json!({
                "me": online_at(T),
                "a": online_at(T - 60_000),
                "b": online_at(T - 1_000),
            }),
        );
        source.set_root(
            Family::Typing,
            json!({
                "me": { "typing": true },
                "a": { "typing": true },
                "b": { "typing": true },
            }),
        );
    })
    .await;

    let uids: Vec<String> = h.engine.get_all_typing().into_iter().map(|e| e.uid).collect();
    assert_eq!(uids, vec!["b", "a"]);
}

#[tokio::test]
async fn shutdown_releases_every_subscription() {
    let h = harness().await;
    h.engine.get_presence("u9");
    settle().await;
    assert_eq!(h.source.live_subscribers(&StatePath::root(Family::Presence)), 1);

    h.engine.shutdown();
    settle().await;
    assert_eq!(h.source.live_subscribers(&StatePath::root(Family::Presence)), 0);
    assert_eq!(h.source.live_subscribers(&StatePath::root(Family::Typing)), 0);
    assert_eq!(h.source.live_subscribers(&StatePath::user(Family::Presence, "u9")), 0);
    assert_eq!(h.engine.fallback_watch_count(), 0);
}

#[tokio::test]
async fn queries_after_shutdown_open_no_watches() {
    let h = harness().await;
    h.engine.shutdown();

    let p = h.engine.get_presence("late");
    assert_eq!(p.state, PresenceState::Offline);
    settle().await;
    assert_eq!(h.engine.fallback_watch_count(), 0);
    assert_eq!(h.source.subscribe_calls(&StatePath::user(Family::Presence, "late")), 0);
    h.engine.shutdown();
}

#[tokio::test]
async fn closed_presence_root_recovers_through_fallback() {
    let h = harness().await;
    h.source.set_root(Family::Presence, json!({ "u1": online_at(T) }));
    settle().await;
    assert_eq!(h.engine.get_presence("u1").state, PresenceState::Online);
    assert_eq!(h.engine.fallback_watch_count(), 0);

    h.source.close(&StatePath::root(Family::Presence));
    settle().await;
    h.source.set(Family::Presence, "u1", Some(online_at(T + 400_000)));
    h.clock.set(T + 400_000);

    h.engine.get_presence("u1");
    settle().await;
    let p = h.engine.get_presence("u1");
    assert_eq!(p.state, PresenceState::Online);
    assert_eq!(p.last_seen, T + 400_000);
    assert_eq!(h.engine.fallback_watch_count(), 1);
}

#[tokio::test]
async fn closed_typing_root_drops_flags_nobody_watches() {
    let h = harness().await;
    h.source.set_root(Family::Typing, json!({ "a": { "typing": true } }));
    settle().await;
    assert_eq!(h.engine.get_all_typing().len(), 1);

    h.source.close(&StatePath::root(Family::Typing));
    settle().await;
    assert!(h.engine.get_all_typing().is_empty());

    h.engine.get_presence("a");
    settle().await;
    let uids: Vec<String> = h.engine.get_all_typing().into_iter().map(|e| e.uid).collect();
    assert_eq!(uids, vec!["a"]);
    assert!(h.engine.get_presence("a").typing);
}

#[tokio::test]
async fn observers_release_fallbacks_when_enabled() {
    let config = Config {
        release_unobserved_fallbacks: true,
        ..Config::default()
    };
    let h = harness_with(config, |_| {}).await;
    let guard = h.engine.observe("u5");
    settle().await;
    assert_eq!(h.engine.fallback_watch_count(), 1);

    drop(guard);
    assert_eq!(h.engine.fallback_watch_count(), 0);
}

#[tokio::test]
async fn http_routes_serve_engine_reads() {
    let source = Arc::new(MemorySource::new());
    source.set(Family::Presence, "u1", Some(online_at(T)));
    source.set(Family::Typing, "u1", Some(json!({ "typing": true })));
    let clock = Arc::new(ManualClock::new(T));
    let engine = Arc::new(PresenceEngine::start(source, clock, &Config::default()).await);
    settle().await;
    let app = create_app(AppState::new(engine));

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/presence/u1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!({ "state": "online", "lastSeen": T, "online": true, "typing": true }));

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/typing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!([{ "uid": "u1", "lastSeen": T }]));

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.get("awayAfterSeconds").and_then(|v| v.as_u64()), Some(300));

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/presence/a*b").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn redis_source_feeds_engine() {
    use redis::AsyncCommands;

    let redis_url = match std::env::var("TEST_REDIS_URL") {
        Ok(u) => u,
        Err(_) => {
            eprintln!("Skip redis test: set TEST_REDIS_URL");
            return;
        }
    };
    let prefix = format!("test-{}:", uuid::Uuid::new_v4().as_simple());
    let source = RedisSource::new(&redis_url, &prefix).unwrap();
    let client = redis::Client::open(redis_url.as_str()).unwrap();
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Skip redis test: {}", e);
            return;
        }
    };

    let presence_key = source.key_for(Family::Presence, "u1");
    let typing_key = source.key_for(Family::Typing, "u1");
    let now = SystemClock.now_ms();
    conn.set::<_, _, ()>(&presence_key, online_at(now).to_string())
        .await
        .unwrap();

    let engine = PresenceEngine::start(Arc::new(source), Arc::new(SystemClock), &Config::default()).await;
    let mut online = false;
    for _ in 0..40 {
        if engine.get_presence("u1").state == PresenceState::Online {
            online = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(online, "initial root load should see u1");

    let payload = json!({ "typing": true }).to_string();
    conn.set::<_, _, ()>(&typing_key, &payload).await.unwrap();
    conn.publish::<_, _, ()>(&typing_key, &payload).await.unwrap();
    let mut typing = false;
    for _ in 0..40 {
        if engine.get_presence("u1").typing {
            typing = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(typing, "published typing flag should arrive");

    engine.shutdown();
    conn.del::<_, ()>(vec![presence_key, typing_key]).await.unwrap();
}
