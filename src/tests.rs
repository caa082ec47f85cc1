//! Integration tests for the DailyFlow backend.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::Config;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    storage_root: PathBuf,
    temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some("test-api-key".to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let storage_root = temp_dir.path().join("storage");

        let config = Config {
            api_psk: psk.clone(),
            db_path: temp_dir.path().join("test.sqlite"),
            index_path: temp_dir.path().join("index"),
            storage_root: storage_root.clone(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            owner_id: "u1".to_string(),
            utc_offset: chrono::FixedOffset::east_opt(0).unwrap(),
            reconcile_on_start: false,
        };

        let state = AppState::init(config).await.expect("Failed to init state");
        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

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
            storage_root,
            temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Write a fake image on the "device" and return its path.
    fn local_image(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, b"not really a png").unwrap();
        path
    }

    async fn create_diary(&self, body: Value) -> Value {
        let resp = self
            .client
            .post(self.url("/api/diaries"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"].clone()
    }

    /// Poll the listing until it leaves the loading state.
    async fn settled_view(&self) -> Value {
        for _ in 0..50 {
            let body: Value = self
                .client
                .get(self.url("/api/view"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            let status = body["data"]["result"]["status"].as_str().unwrap_or_default();
            if status == "success" || status == "error" {
                return body["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Listing never settled");
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
        .get(fixture.url("/api/view"))
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
        .get(fixture.url("/api/view"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_auth_bearer_token() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/reminder"))
        .header("Authorization", "Bearer test-api-key")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_no_psk_allows_access() {
    let fixture = TestFixture::with_psk(None).await;

    let resp = fixture
        .client
        .get(fixture.url("/api/view"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_diary_crud() {
    let fixture = TestFixture::new().await;
    let image = fixture.local_image("beach.png");

    let created = fixture
        .create_diary(json!({
            "title": "Beach day",
            "description": "Sand everywhere",
            "date": "2024-01-05T12:00:00Z",
            "images": [{ "localPath": image }]
        }))
        .await;
    let id = created["id"].as_str().unwrap().to_string();
    let remote = created["images"][0].as_str().unwrap().to_string();
    assert_eq!(created["ownerId"], "u1");
    assert!(remote.starts_with("images/u1/"));
    assert!(remote.ends_with(".png"));
    assert!(fixture.storage_root.join(&remote).exists());

    // Read
    let resp = fixture
        .client
        .get(fixture.url(&format!("/api/diaries/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["title"], "Beach day");

    // Update: drop the image, rename
    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/diaries/{}", id)))
        .json(&json!({ "title": "Quiet beach", "removeImages": [remote] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["title"], "Quiet beach");
    assert_eq!(body["data"]["images"], json!([]));
    assert!(!fixture.storage_root.join(&remote).exists());

    // Delete
    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/diaries/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .client
        .get(fixture.url(&format!("/api/diaries/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_diary_requires_title() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/diaries"))
        .json(&json!({ "title": "   " }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_view_lists_everything_on_start() {
    let fixture = TestFixture::new().await;

    let view = fixture.settled_view().await;

    assert_eq!(view["filter"]["kind"], "none");
    assert_eq!(view["result"]["status"], "success");
    assert_eq!(view["result"]["data"], json!({}));
}

#[tokio::test]
async fn test_view_date_filter() {
    let fixture = TestFixture::new().await;
    fixture
        .create_diary(json!({ "title": "Fifth", "date": "2024-01-05T09:00:00Z" }))
        .await;
    fixture
        .create_diary(json!({ "title": "Sixth", "date": "2024-01-06T09:00:00Z" }))
        .await;

    let resp = fixture
        .client
        .put(fixture.url("/api/view/filter"))
        .json(&json!({ "kind": "byDate", "value": "2024-01-05" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["result"]["status"], "loading");
    let generation = body["data"]["generation"].as_u64().unwrap();

    let view = fixture.settled_view().await;
    assert_eq!(view["generation"].as_u64().unwrap(), generation);
    let groups = view["result"]["data"].as_object().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups["2024-01-05"][0]["title"], "Fifth");
}

#[tokio::test]
async fn test_view_text_filter_and_reset() {
    let fixture = TestFixture::new().await;
    fixture
        .create_diary(json!({ "title": "Beach walk", "date": "2024-01-05T09:00:00Z" }))
        .await;
    fixture
        .create_diary(json!({ "title": "Office", "date": "2024-01-06T09:00:00Z" }))
        .await;

    fixture
        .client
        .put(fixture.url("/api/view/filter"))
        .json(&json!({ "kind": "byText", "value": "bea" }))
        .send()
        .await
        .unwrap();
    let view = fixture.settled_view().await;
    let groups = view["result"]["data"].as_object().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups["2024-01-05"][0]["title"], "Beach walk");

    let resp = fixture
        .client
        .delete(fixture.url("/api/view/filter"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let view = fixture.settled_view().await;
    assert_eq!(view["filter"]["kind"], "none");
    assert_eq!(view["result"]["data"].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn test_view_blank_text_filter_rejected() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/view/filter"))
        .json(&json!({ "kind": "byText", "value": "  " }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_reminder_settings() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/reminder"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["data"],
        json!({ "enabled": false, "hour": 20, "minute": 0 })
    );

    let resp = fixture
        .client
        .put(fixture.url("/api/reminder"))
        .json(&json!({ "enabled": true, "hour": 7, "minute": 30 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = fixture
        .client
        .get(fixture.url("/api/reminder"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body["data"],
        json!({ "enabled": true, "hour": 7, "minute": 30 })
    );
}

#[tokio::test]
async fn test_reminder_rejects_invalid_time() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/reminder"))
        .json(&json!({ "enabled": true, "hour": 24 }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_failed_upload_is_queued_and_reconciled() {
    let fixture = TestFixture::new().await;
    // The image is not on disk yet, so the first upload fails.
    let image = fixture.temp_dir.path().join("later.png");

    let created = fixture
        .create_diary(json!({ "title": "Pending", "images": [{ "localPath": image }] }))
        .await;
    let remote = created["images"][0].as_str().unwrap().to_string();

    let body: Value = fixture
        .client
        .get(fixture.url("/api/sync/outbox"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["uploads"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["uploads"][0]["remotePath"], remote.as_str());
    assert_eq!(body["data"]["deletes"], json!([]));

    std::fs::write(&image, b"now it exists").unwrap();

    let resp = fixture
        .client
        .post(fixture.url("/api/sync/reconcile"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["uploads"][0]["status"]["status"], "completed");
    assert!(fixture.storage_root.join(&remote).exists());

    let body: Value = fixture
        .client
        .get(fixture.url("/api/sync/outbox"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["uploads"], json!([]));
}

#[tokio::test]
async fn test_delete_all_requires_connectivity() {
    let fixture = TestFixture::new().await;
    let created = fixture.create_diary(json!({ "title": "Keep me" })).await;
    std::fs::remove_dir_all(&fixture.storage_root).unwrap();

    let resp = fixture
        .client
        .delete(fixture.url("/api/diaries"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CONNECTIVITY_UNAVAILABLE");

    let resp = fixture
        .client
        .get(fixture.url(&format!(
            "/api/diaries/{}",
            created["id"].as_str().unwrap()
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_delete_all() {
    let fixture = TestFixture::new().await;
    let image = fixture.local_image("a.png");
    fixture
        .create_diary(json!({ "title": "One", "images": [{ "localPath": image }] }))
        .await;
    fixture.create_diary(json!({ "title": "Two" })).await;

    let resp = fixture
        .client
        .delete(fixture.url("/api/diaries"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["count"], 2);

    let leftover = std::fs::read_dir(fixture.storage_root.join("images/u1"))
        .unwrap()
        .count();
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn test_delete_all_turns_reminder_off() {
    let fixture = TestFixture::new().await;
    fixture.create_diary(json!({ "title": "One" })).await;
    let resp = fixture
        .client
        .put(fixture.url("/api/reminder"))
        .json(&json!({ "enabled": true, "hour": 7, "minute": 30 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .client
        .delete(fixture.url("/api/diaries"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = fixture
        .client
        .get(fixture.url("/api/reminder"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body["data"],
        json!({ "enabled": false, "hour": 7, "minute": 30 })
    );
}

#[tokio::test]
async fn test_transfer_rejects_current_owner() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/diaries/transfer"))
        .json(&json!({ "fromOwnerId": "u1" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_router_oneshot_health() {
    use tower::ServiceExt;

    let fixture_dir = TempDir::new().unwrap();
    let config = Config {
        api_psk: None,
        db_path: fixture_dir.path().join("test.sqlite"),
        index_path: fixture_dir.path().join("index"),
        storage_root: fixture_dir.path().join("storage"),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "warn".to_string(),
        owner_id: "u1".to_string(),
        utc_offset: chrono::FixedOffset::east_opt(0).unwrap(),
        reconcile_on_start: false,
    };
    let app = create_router(AppState::init(config).await.unwrap());

    let resp = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}
