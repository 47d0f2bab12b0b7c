//! Integration tests for the BINI connection service.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::{Config, Timings};
use crate::db::{init_database, Repository};
use crate::features::{FeatureFlags, COOPERATIVE_QUESTS};
use crate::session::heartbeat::SimulatedHeartRate;
use crate::session::registry::SessionRegistry;
use crate::session::SessionSettings;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::build(Some("test-api-key".to_string()), FeatureFlags::default()).await
    }

    async fn build(psk: Option<String>, features: FeatureFlags) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let gateway = Arc::new(Repository::new(pool));

        // Fast heartbeat so the loop is observable in real time
        let config = Config {
            api_psk: psk.clone(),
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            features,
            timings: Timings {
                heartbeat_interval: Duration::from_millis(50),
                ..Timings::default()
            },
            synchro_session_ttl: Duration::from_secs(120),
            burst_limit: 50,
        };

        let registry = Arc::new(SessionRegistry::new(
            gateway,
            SessionSettings {
                flags: config.features.clone(),
                timings: config.timings,
                burst_limit: config.burst_limit,
            },
            Arc::new(SimulatedHeartRate::default()),
        ));

        let state = AppState {
            registry,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn login(&self, user_id: &str, partner_id: Option<&str>) -> Value {
        let resp = self
            .post(
                "/sessions",
                json!({ "userId": user_id, "partnerId": partner_id }),
            )
            .await;
        assert_eq!(resp.status(), 200);
        resp.json::<Value>().await.unwrap()["data"].clone()
    }

    async fn session(&self, user_id: &str) -> Value {
        let resp = self.get(&format!("/sessions/{}", user_id)).await;
        assert_eq!(resp.status(), 200);
        resp.json::<Value>().await.unwrap()["data"].clone()
    }

    /// Poll until the pushed change lands in `user_id`'s session.
    async fn wait_for(&self, user_id: &str, check: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..40 {
            let session = self.session(user_id).await;
            if check(&session) {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("session of {} never reached the expected state", user_id);
    }
}

async fn error_code(resp: Response) -> String {
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    body["error"]["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(format!("{}/health", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth() {
    let fixture = TestFixture::new().await;
    let url = fixture.url("/sessions/alice");
    let client = Client::new();

    // Request without API key
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(error_code(resp).await, "UNAUTHORIZED");

    // Request with wrong API key
    let resp = client
        .get(&url)
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Bearer token is accepted too; the session just does not exist
    let resp = client
        .get(&url)
        .bearer_auth("test-api-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_auth_disabled_without_psk() {
    let fixture = TestFixture::build(None, FeatureFlags::default()).await;
    let data = fixture.login("alice", None).await;
    assert_eq!(data["userId"], "alice");
}

#[tokio::test]
async fn test_session_lifecycle() {
    let fixture = TestFixture::new().await;

    let data = fixture.login("alice", Some("bob")).await;
    assert_eq!(data["userId"], "alice");
    assert_eq!(data["partnerId"], "bob");
    assert_eq!(data["heartbeat"]["chargeLevel"], 0.0);
    assert_eq!(data["synchro"]["stage"], "idle");
    assert_eq!(data["synchro"]["countdown"], 15);
    assert_eq!(data["synchro"]["partnerConnected"], false);
    assert_eq!(data["quests"], json!([]));

    // Bob coming online reaches alice through the push channel
    fixture.login("bob", Some("alice")).await;
    fixture
        .wait_for("alice", |s| s["synchro"]["partnerConnected"] == true)
        .await;

    let resp = fixture
        .client
        .delete(fixture.url("/sessions/bob"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    fixture
        .wait_for("alice", |s| s["synchro"]["partnerConnected"] == false)
        .await;

    let resp = fixture.get("/sessions/bob").await;
    assert_eq!(resp.status(), 404);
    assert_eq!(error_code(resp).await, "NOT_FOUND");

    let resp = fixture.post("/sessions", json!({ "userId": "" })).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(error_code(resp).await, "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_heartbeat_start_and_stop() {
    let fixture = TestFixture::new().await;
    fixture.login("alice", Some("bob")).await;

    let resp = fixture.post("/sessions/alice/heartbeat/start", json!({})).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["isActive"], true);

    let session = fixture
        .wait_for("alice", |s| {
            s["heartbeat"]["chargeLevel"].as_f64().unwrap_or(0.0) > 0.0
        })
        .await;
    // Bob is not monitoring, so every tick is a solo tick
    assert_eq!(session["heartbeat"]["syncQuality"], "poor");

    let resp = fixture.post("/sessions/alice/heartbeat/stop", json!({})).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["isActive"], false);

    let charge = fixture.session("alice").await["heartbeat"]["chargeLevel"].clone();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fixture.session("alice").await["heartbeat"]["chargeLevel"], charge);
}

#[tokio::test]
async fn test_synchro_invitation_flow() {
    let fixture = TestFixture::new().await;
    fixture.login("alice", Some("bob")).await;

    let resp = fixture.post("/sessions/alice/synchro/start", json!({})).await;
    assert_eq!(resp.status(), 412);
    assert_eq!(error_code(resp).await, "PARTNER_OFFLINE");

    fixture.login("bob", Some("alice")).await;
    let resp = fixture.post("/sessions/alice/synchro/start", json!({})).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["stage"], "preparing");
    assert_eq!(body["data"]["isActive"], true);

    let resp = fixture.post("/sessions/alice/synchro/start", json!({})).await;
    assert_eq!(resp.status(), 409);

    fixture
        .wait_for("bob", |s| s["synchro"]["stage"] == "preparing")
        .await;
    let resp = fixture.post("/sessions/bob/synchro/join", json!({})).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["stage"], "counting");

    fixture
        .wait_for("alice", |s| s["synchro"]["stage"] == "counting")
        .await;

    let resp = fixture.post("/sessions/alice/synchro/leave", json!({})).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["stage"], "idle");
    assert_eq!(body["data"]["countdown"], 15);
}

#[tokio::test]
async fn test_cooperative_quest_flow() {
    let fixture = TestFixture::new().await;
    fixture.login("alice", Some("bob")).await;
    fixture.login("bob", Some("alice")).await;

    let resp = fixture
        .post(
            "/sessions/alice/quests",
            json!({
                "title": "Cook dinner together",
                "reward": "Dessert",
                "steps": [
                    { "title": "Pick a recipe", "assignedTo": "both", "requiresBoth": true },
                    { "title": "Buy groceries", "assignedTo": "user" }
                ]
            }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let quest = resp.json::<Value>().await.unwrap()["data"].clone();
    let quest_id = quest["id"].as_str().unwrap().to_string();
    let shared = quest["steps"][0]["id"].as_str().unwrap().to_string();
    let groceries = quest["steps"][1]["id"].as_str().unwrap().to_string();
    assert_eq!(quest["progress"], 0.0);

    let complete = |user: &str, step: &str| {
        format!(
            "/sessions/{}/quests/{}/steps/{}/complete",
            user, quest_id, step
        )
    };

    // Half of a requires-both step leaves progress untouched
    let resp = fixture.post(&complete("alice", &shared), json!({})).await;
    assert_eq!(resp.status(), 200);
    let quest = resp.json::<Value>().await.unwrap()["data"].clone();
    assert_eq!(quest["progress"], 0.0);
    assert_eq!(quest["steps"][0]["isCompleted"], false);

    let resp = fixture.post(&complete("alice", &shared), json!({})).await;
    assert_eq!(resp.status(), 409);
    assert_eq!(error_code(resp).await, "CONFLICT");

    fixture
        .wait_for("bob", |s| s["quests"].as_array().is_some_and(|q| q.len() == 1))
        .await;
    let resp = fixture.post(&complete("bob", &shared), json!({})).await;
    let quest = resp.json::<Value>().await.unwrap()["data"].clone();
    assert_eq!(quest["progress"], 50.0);
    assert_eq!(quest["steps"][0]["isCompleted"], true);

    let resp = fixture.post(&complete("bob", &groceries), json!({})).await;
    assert_eq!(resp.status(), 403);
    assert_eq!(error_code(resp).await, "FORBIDDEN");

    let resp = fixture.post(&complete("alice", &groceries), json!({})).await;
    let quest = resp.json::<Value>().await.unwrap()["data"].clone();
    assert_eq!(quest["progress"], 100.0);

    let resp = fixture.get("/sessions/bob/quests").await;
    let quests = resp.json::<Value>().await.unwrap()["data"].clone();
    assert_eq!(quests[0]["progress"], 100.0);
    assert_eq!(quests[0]["isActive"], true);
}

#[tokio::test]
async fn test_serendipity_bursts() {
    let fixture = TestFixture::new().await;
    fixture.login("alice", Some("bob")).await;
    fixture.login("bob", Some("alice")).await;

    let resp = fixture
        .post(
            "/sessions/alice/bursts",
            json!({ "type": "message", "content": { "text": "miss you" }, "emotion": "love" }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let sent = resp.json::<Value>().await.unwrap()["data"].clone();
    assert_eq!(sent["fromPartner"], false);

    let resp = fixture
        .post(
            "/sessions/alice/bursts",
            json!({ "type": "photo", "content": { "caption": "no url" } }),
        )
        .await;
    assert_eq!(resp.status(), 400);
    assert_eq!(error_code(resp).await, "VALIDATION_ERROR");

    let session = fixture
        .wait_for("bob", |s| s["bursts"].as_array().is_some_and(|b| b.len() == 1))
        .await;
    let burst = &session["bursts"][0];
    assert_eq!(burst["fromPartner"], true);
    assert_eq!(burst["isNew"], true);
    assert_eq!(burst["type"], "message");

    let burst_id = burst["id"].as_str().unwrap();
    let resp = fixture
        .post(&format!("/sessions/bob/bursts/{}/read", burst_id), json!({}))
        .await;
    assert_eq!(resp.status(), 200);

    let resp = fixture.get("/sessions/bob/bursts").await;
    let bursts = resp.json::<Value>().await.unwrap()["data"].clone();
    assert_eq!(bursts[0]["isNew"], false);
}

#[tokio::test]
async fn test_preconditions() {
    let fixture = TestFixture::build(
        Some("test-api-key".to_string()),
        FeatureFlags::with_disabled([COOPERATIVE_QUESTS]),
    )
    .await;
    fixture.login("alice", Some("bob")).await;
    fixture.login("carol", None).await;

    let resp = fixture.get("/sessions/alice/quests").await;
    assert_eq!(resp.status(), 404);
    assert_eq!(error_code(resp).await, "FEATURE_DISABLED");

    let resp = fixture
        .post(
            "/sessions/carol/bursts",
            json!({ "type": "message", "content": { "text": "hello?" } }),
        )
        .await;
    assert_eq!(resp.status(), 412);
    assert_eq!(error_code(resp).await, "MISSING_PARTNER");

    let resp = fixture.post("/sessions/carol/synchro/start", json!({})).await;
    assert_eq!(error_code(resp).await, "MISSING_PARTNER");
}
