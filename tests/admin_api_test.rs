//! Admin API lifecycle tests over a live listener.

use registry_gateway::admin::build_admin_router;
use registry_gateway::mapping::MemoryConfigStore;
use registry_gateway::server::serve_http;
use registry_gateway::Manager;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

fn spawn_admin() -> (SocketAddr, Arc<Manager>) {
    let manager = Arc::new(Manager::new(Arc::new(MemoryConfigStore::new())));
    let router = build_admin_router(manager.clone());
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind admin");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(serve_http(listener, router, axum_server::Handle::new()));
    (addr, manager)
}

#[tokio::test]
async fn health_endpoint() {
    let (addr, _manager) = spawn_admin();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/api/v1/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn add_list_get_remove_lifecycle() {
    let (addr, _manager) = spawn_admin();
    let client = reqwest::Client::new();
    let base = format!("http://{}/api/registries", addr);

    // Add.
    let response = client
        .post(&base)
        .json(&json!({
            "hostName": "quay.io",
            "remoteUrl": "https://quay.io",
            "username": "robot",
            "password": "secret"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    // List is sanitized.
    let response = client.get(&base).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let listed: serde_json::Value = response.json().await.unwrap();
    let entries = listed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["hostName"], "quay.io");
    assert!(entries[0].get("username").is_none() || entries[0]["username"].is_null());

    // Get by host is sanitized too.
    let response = client
        .get(format!("{}/quay.io", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let record: serde_json::Value = response.json().await.unwrap();
    assert_eq!(record["remoteUrl"], "https://quay.io");
    assert!(record.get("password").is_none() || record["password"].is_null());

    // Remove closes the lifecycle.
    let response = client
        .delete(format!("{}/quay.io", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = client.get(&base).send().await.unwrap();
    let listed: serde_json::Value = response.json().await.unwrap();
    assert!(listed.as_array().unwrap().is_empty());

    let response = client
        .delete(format!("{}/quay.io", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_path_host_overrides_body() {
    let (addr, manager) = spawn_admin();
    let client = reqwest::Client::new();
    let base = format!("http://{}/api/registries", addr);

    client
        .post(&base)
        .json(&json!({"hostName": "gcr.io", "remoteUrl": "https://gcr.io"}))
        .send()
        .await
        .unwrap();

    // The body claims a different host; the path wins.
    let response = client
        .put(format!("{}/gcr.io", base))
        .json(&json!({"hostName": "something-else.io", "remoteUrl": "https://mirror.gcr.io"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let updated = manager.mapping_for("gcr.io").unwrap();
    assert_eq!(updated.remote_url, "https://mirror.gcr.io");
    assert!(manager.mapping_for("something-else.io").is_none());
}

#[tokio::test]
async fn bad_bodies_are_400() {
    let (addr, _manager) = spawn_admin();
    let client = reqwest::Client::new();
    let base = format!("http://{}/api/registries", addr);

    // Not JSON at all.
    let response = client
        .post(&base)
        .header("Content-Type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    // Unparsable remote URL.
    let response = client
        .post(&base)
        .json(&json!({"hostName": "x.io", "remoteUrl": "://nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_host_is_404() {
    let (addr, _manager) = spawn_admin();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/api/registries/ghost.io", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn method_mismatch_is_405() {
    let (addr, _manager) = spawn_admin();
    let client = reqwest::Client::new();

    let response = client
        .patch(format!("http://{}/api/registries", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}
