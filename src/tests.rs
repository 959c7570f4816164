//! Integration tests for the Command Center backend.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::Config;
use crate::db::{init_database, DocumentStore, Repository, UnavailableStore};
use crate::presence::ManualClock;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    clock: Arc<ManualClock>,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some("test-api-key".to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let store = Arc::new(Repository::new(pool, Duration::from_secs(5)));

        Self::serve(store, psk, temp_dir).await
    }

    /// Serve the router over `store` on an ephemeral port.
    async fn serve(store: Arc<dyn DocumentStore>, psk: Option<String>, temp_dir: TempDir) -> Self {
        let clock = Arc::new(ManualClock::at(0));
        let config = test_config(psk.clone(), &temp_dir);
        let app = create_router(AppState::new(store, clock.clone(), config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            clock,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn heartbeat(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/presence"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn active_users(&self) -> Value {
        let resp = self
            .client
            .get(self.url("/api/presence"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["users"].clone()
    }
}

fn test_config(psk: Option<String>, temp_dir: &TempDir) -> Config {
    Config {
        api_psk: psk,
        db_path: temp_dir.path().join("test.sqlite"),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "warn".to_string(),
        store_timeout: Duration::from_secs(5),
        presence_max_attempts: 16,
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/presence"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .post(fixture.url("/api/presence"))
        .header("x-api-key", "wrong-key")
        .json(&json!({ "userId": "a@x.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Rejected heartbeats never reach the store.
    assert_eq!(fixture.active_users().await, json!({}));
}

#[tokio::test]
async fn test_auth_bearer_token() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/presence"))
        .bearer_auth("test-api-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_auth_disabled_without_psk() {
    let fixture = TestFixture::with_psk(None).await;

    let resp = fixture.heartbeat(json!({ "userId": "a@x.com" })).await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_heartbeat_then_poll() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .heartbeat(json!({ "userId": "a@x.com", "profile": { "name": "A" } }))
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "ok": true, "active": 1 }));

    assert_eq!(
        fixture.active_users().await,
        json!({ "a@x.com": { "lastSeen": 0, "profile": { "name": "A" } } })
    );
}

#[tokio::test]
async fn test_poll_after_threshold_is_empty() {
    let fixture = TestFixture::new().await;

    fixture
        .heartbeat(json!({ "userId": "a@x.com", "profile": { "name": "A" } }))
        .await;

    fixture.clock.set(90_000);
    assert!(fixture.active_users().await.get("a@x.com").is_some());

    fixture.clock.set(90_001);
    assert_eq!(fixture.active_users().await, json!({}));
}

#[tokio::test]
async fn test_later_heartbeat_prunes_stale_user() {
    let fixture = TestFixture::new().await;

    fixture.heartbeat(json!({ "userId": "a@x.com" })).await;

    fixture.clock.set(100_000);
    let resp = fixture.heartbeat(json!({ "userId": "b@x.com" })).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["active"], 1);

    let users = fixture.active_users().await;
    assert_eq!(
        users,
        json!({ "b@x.com": { "lastSeen": 100_000, "profile": {} } })
    );
}

#[tokio::test]
async fn test_profile_survives_bare_heartbeat() {
    let fixture = TestFixture::new().await;

    fixture
        .heartbeat(json!({ "userId": "a@x.com", "profile": { "name": "A", "role": "ops" } }))
        .await;
    fixture.clock.set(30_000);
    fixture.heartbeat(json!({ "userId": "a@x.com" })).await;

    let users = fixture.active_users().await;
    assert_eq!(users["a@x.com"]["lastSeen"], 30_000);
    assert_eq!(users["a@x.com"]["profile"], json!({ "name": "A", "role": "ops" }));
}

#[tokio::test]
async fn test_client_timestamps_are_ignored() {
    let fixture = TestFixture::new().await;
    fixture.clock.set(5_000);

    fixture
        .heartbeat(json!({ "userId": "a@x.com", "lastSeen": 999_999_999 }))
        .await;

    let users = fixture.active_users().await;
    assert_eq!(users["a@x.com"]["lastSeen"], 5_000);
}

#[tokio::test]
async fn test_heartbeat_validation_errors() {
    let fixture = TestFixture::new().await;

    for body in [
        json!({}),
        json!({ "userId": "" }),
        json!({ "userId": "   " }),
        json!({ "userId": null }),
        json!({ "userId": 42 }),
        json!({ "userId": "a@x.com", "profile": [1, 2] }),
    ] {
        let resp = fixture.heartbeat(body.clone()).await;
        assert_eq!(resp.status(), 400, "body {} should be rejected", body);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"]["code"], "VALIDATION_ERROR");
    }

    assert_eq!(fixture.active_users().await, json!({}));
}

#[tokio::test]
async fn test_heartbeat_malformed_body() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/presence"))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_concurrent_heartbeats_all_recorded() {
    let fixture = Arc::new(TestFixture::new().await);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..10 {
        let fixture = fixture.clone();
        tasks.spawn(async move {
            fixture
                .heartbeat(json!({ "userId": format!("user-{}@x.com", i) }))
                .await
                .status()
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), 200);
    }

    let users = fixture.active_users().await;
    let users = users.as_object().unwrap();
    assert_eq!(users.len(), 10);
    for i in 0..10 {
        assert!(users.contains_key(&format!("user-{}@x.com", i)));
    }
}

#[tokio::test]
async fn test_store_outage() {
    let temp_dir = TempDir::new().unwrap();
    let fixture = TestFixture::serve(
        Arc::new(UnavailableStore),
        Some("test-api-key".to_string()),
        temp_dir,
    )
    .await;

    // Heartbeats report the failure.
    let resp = fixture.heartbeat(json!({ "userId": "a@x.com" })).await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "STORE_ERROR");

    // Polls degrade to nobody active.
    assert_eq!(fixture.active_users().await, json!({}));

    let resp = fixture
        .client
        .get(fixture.url("/api/state"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}

#[tokio::test]
async fn test_dashboard_state_roundtrip() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/state"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], Value::Null);
    assert_eq!(body["revisionId"], 0);

    let state = json!({ "jobs": [{ "id": 1, "status": "booked" }], "notes": "load-in 9am" });
    let resp = fixture
        .client
        .put(fixture.url("/api/state"))
        .json(&json!({ "data": state }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["revisionId"], 1);

    let resp = fixture
        .client
        .get(fixture.url("/api/state"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"], state);
    assert_eq!(body["revisionId"], 1);
}

#[tokio::test]
async fn test_dashboard_state_optimistic_concurrency() {
    let fixture = TestFixture::new().await;

    // expectedVersion 0 creates.
    let resp = fixture
        .client
        .put(fixture.url("/api/state"))
        .json(&json!({ "data": { "v": 1 }, "expectedVersion": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .client
        .put(fixture.url("/api/state"))
        .json(&json!({ "data": { "v": 2 }, "expectedVersion": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["revisionId"], 2);

    // A writer still on version 1 loses.
    let resp = fixture
        .client
        .put(fixture.url("/api/state"))
        .json(&json!({ "data": { "v": "stale" }, "expectedVersion": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 2);

    let resp = fixture
        .client
        .get(fixture.url("/api/state"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"], json!({ "v": 2 }));
}

#[tokio::test]
async fn test_dashboard_state_requires_data() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/state"))
        .json(&json!({ "expectedVersion": 3 }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}
