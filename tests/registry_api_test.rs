//! End-to-end tests of the local V2 registry over a real listener.

use registry_gateway::mapping::MemoryConfigStore;
use registry_gateway::server::{build_gateway_router, GatewayState};
use registry_gateway::{ContentStore, Manager, MemoryContentStore};
use std::net::SocketAddr;
use std::sync::Arc;

const HELLOWORLD_DIGEST: &str =
    "sha256:936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af";

/// Start a gateway with no mappings so every request hits the local engine.
fn spawn_local_registry() -> SocketAddr {
    let manager = Arc::new(Manager::new(Arc::new(MemoryConfigStore::new())));
    let content: Arc<dyn ContentStore> = Arc::new(MemoryContentStore::new());
    let router = build_gateway_router(GatewayState { manager, content });

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handle = axum_server::Handle::new();
    tokio::spawn(registry_gateway::server::serve_http(listener, router, handle));
    addr
}

#[tokio::test]
async fn version_check() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/v2/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("Docker-Distribution-API-Version")
            .and_then(|v| v.to_str().ok()),
        Some("registry/2.0")
    );
    assert_eq!(response.text().await.unwrap(), "{}");
}

#[tokio::test]
async fn method_mismatch_is_405() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v2/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn manifest_put_get_head_delete() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();
    let manifest = br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","config":{}}"#;

    let response = client
        .put(format!("http://{}/v2/library/nginx/manifests/latest", addr))
        .body(manifest.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let digest = response
        .headers()
        .get("Docker-Content-Digest")
        .and_then(|v| v.to_str().ok())
        .expect("digest header")
        .to_string();
    assert!(digest.starts_with("sha256:"));

    // GET by tag returns the verbatim bytes and the digest.
    let response = client
        .get(format!("http://{}/v2/library/nginx/manifests/latest", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok()),
        Some(digest.as_str())
    );
    assert_eq!(
        response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok()),
        Some("application/vnd.docker.distribution.manifest.v2+json")
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), manifest);

    // GET by digest bypasses tag resolution.
    let response = client
        .get(format!(
            "http://{}/v2/library/nginx/manifests/{}",
            addr, digest
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), manifest);

    // HEAD reports size and digest without a body.
    let response = client
        .head(format!("http://{}/v2/library/nginx/manifests/latest", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("Content-Length")
            .and_then(|v| v.to_str().ok()),
        Some(manifest.len().to_string().as_str())
    );

    // DELETE by tag removes tag and manifest.
    let response = client
        .delete(format!("http://{}/v2/library/nginx/manifests/latest", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let response = client
        .get(format!("http://{}/v2/library/nginx/manifests/latest", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client
        .get(format!(
            "http://{}/v2/library/nginx/manifests/{}",
            addr, digest
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manifest_put_rejects_bad_schema() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();

    let response = client
        .put(format!("http://{}/v2/repo/manifests/latest", addr))
        .body(r#"{"schemaVersion":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .put(format!("http://{}/v2/repo/manifests/latest", addr))
        .body("not json at all")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn resumable_upload_scenario() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();

    // Initiate.
    let response = client
        .post(format!("http://{}/v2/acme/widget/blobs/uploads/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    assert_eq!(
        response.headers().get("Range").and_then(|v| v.to_str().ok()),
        Some("0-0")
    );
    let location = response
        .headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string();
    let upload_id = response
        .headers()
        .get("Docker-Upload-UUID")
        .and_then(|v| v.to_str().ok())
        .expect("upload uuid")
        .to_string();
    assert!(location.ends_with(&upload_id));

    // Two PATCH appends with running-sum ranges.
    let response = client
        .patch(format!("http://{}{}", addr, location))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    assert_eq!(
        response.headers().get("Range").and_then(|v| v.to_str().ok()),
        Some("0-4")
    );

    let response = client
        .patch(format!("http://{}{}", addr, location))
        .body("world")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    assert_eq!(
        response.headers().get("Range").and_then(|v| v.to_str().ok()),
        Some("0-9")
    );

    // HEAD reports the current offset.
    let response = client
        .head(format!("http://{}{}", addr, location))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers().get("Range").and_then(|v| v.to_str().ok()),
        Some("0-9")
    );

    // Finalize.
    let response = client
        .put(format!(
            "http://{}{}?digest={}",
            addr, location, HELLOWORLD_DIGEST
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(
        response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok()),
        Some(format!("/v2/acme/widget/blobs/{}", HELLOWORLD_DIGEST).as_str())
    );

    // The blob is now readable with correct length and digest headers.
    let response = client
        .get(format!(
            "http://{}/v2/acme/widget/blobs/{}",
            addr, HELLOWORLD_DIGEST
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("Content-Length")
            .and_then(|v| v.to_str().ok()),
        Some("10")
    );
    assert_eq!(response.text().await.unwrap(), "helloworld");

    // And the catalog lists the repository.
    let response = client
        .get(format!("http://{}/v2/_catalog", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["repositories"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "acme/widget"));
}

#[tokio::test]
async fn upload_put_without_patch_carries_full_blob() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v2/repo/blobs/uploads/", addr))
        .send()
        .await
        .unwrap();
    let location = response
        .headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    let response = client
        .put(format!(
            "http://{}{}?digest={}",
            addr, location, HELLOWORLD_DIGEST
        ))
        .body("helloworld")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let response = client
        .get(format!(
            "http://{}/v2/repo/blobs/{}",
            addr, HELLOWORLD_DIGEST
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "helloworld");
}

#[tokio::test]
async fn upload_digest_mismatch_creates_no_blob() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();
    let bogus = format!("sha256:{}", "0".repeat(64));

    let response = client
        .post(format!("http://{}/v2/acme/widget/blobs/uploads/", addr))
        .send()
        .await
        .unwrap();
    let location = response
        .headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    client
        .patch(format!("http://{}{}", addr, location))
        .body("helloworld")
        .send()
        .await
        .unwrap();

    let response = client
        .put(format!("http://{}{}?digest={}", addr, location, bogus))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    for digest in [bogus.as_str(), HELLOWORLD_DIGEST] {
        let response = client
            .get(format!("http://{}/v2/acme/widget/blobs/{}", addr, digest))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn upload_put_requires_digest_param() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v2/repo/blobs/uploads/", addr))
        .send()
        .await
        .unwrap();
    let location = response
        .headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    let response = client
        .put(format!("http://{}{}", addr, location))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_delete_aborts_session() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v2/repo/blobs/uploads/", addr))
        .send()
        .await
        .unwrap();
    let location = response
        .headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    let response = client
        .delete(format!("http://{}{}", addr, location))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    // Subsequent appends see an unknown session.
    let response = client
        .patch(format!("http://{}{}", addr, location))
        .body("data")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_slashes_normalize() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();
    let manifest = br#"{"schemaVersion":2}"#;

    let response = client
        .put(format!("http://{}/v2/foo/manifests/latest", addr))
        .body(manifest.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let response = client
        .get(format!("http://{}/v2//foo//manifests//latest", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), manifest);
}

#[tokio::test]
async fn deep_repository_names_route_correctly() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();
    let manifest = br#"{"schemaVersion":2}"#;

    let response = client
        .put(format!("http://{}/v2/a/b/c/manifests/v1", addr))
        .body(manifest.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let response = client
        .get(format!("http://{}/v2/a/b/c/tags/list", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["name"], "a/b/c");
    assert_eq!(body["tags"][0], "v1");
}

#[tokio::test]
async fn unknown_paths_are_404() {
    let addr = spawn_local_registry();
    let client = reqwest::Client::new();

    for path in ["/v2/onlyrepo", "/not-v2/at-all", "/v2/repo/unknownop/x"] {
        let response = client
            .get(format!("http://{}{}", addr, path))
            .send()
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            reqwest::StatusCode::NOT_FOUND,
            "path {}",
            path
        );
    }
}
