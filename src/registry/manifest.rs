use super::{error_response, read_body};
use crate::error::GatewayError;
use crate::store::{compute_digest, ContentStore};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

pub const MEDIA_TYPE_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Deserialize, Default)]
struct ManifestEnvelope {
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    #[serde(rename = "schemaVersion")]
    schema_version: Option<i64>,
    manifests: Option<Vec<serde_json::Value>>,
}

/// Classify stored manifest bytes by structure.
///
/// schemaVersion 2 with a non-empty `manifests` array is a manifest list;
/// the declared mediaType chooses between the Docker list and the OCI
/// index, defaulting to the Docker list. Anything else uses the declared
/// mediaType, defaulting to Docker manifest v2.
pub fn detect_media_type(data: &[u8]) -> String {
    let envelope: ManifestEnvelope = match serde_json::from_slice(data) {
        Ok(envelope) => envelope,
        Err(_) => return MEDIA_TYPE_MANIFEST_V2.to_string(),
    };

    if envelope.schema_version == Some(2)
        && envelope.manifests.as_ref().is_some_and(|m| !m.is_empty())
    {
        return match envelope.media_type.as_deref() {
            Some(MEDIA_TYPE_OCI_INDEX) => MEDIA_TYPE_OCI_INDEX.to_string(),
            _ => MEDIA_TYPE_MANIFEST_LIST.to_string(),
        };
    }

    envelope
        .media_type
        .unwrap_or_else(|| MEDIA_TYPE_MANIFEST_V2.to_string())
}

/// A manifest PUT must carry JSON with schemaVersion 2.
fn validate_manifest(data: &[u8]) -> Result<(), GatewayError> {
    let envelope: ManifestEnvelope = serde_json::from_slice(data)
        .map_err(|e| GatewayError::Registry(format!("invalid manifest format: {}", e)))?;
    if envelope.schema_version != Some(2) {
        return Err(GatewayError::Registry(
            "unsupported manifest schema version".to_string(),
        ));
    }
    Ok(())
}

fn manifest_headers(data: &[u8], digest: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(content_type) = HeaderValue::from_str(&detect_media_type(data)) {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    if let Ok(value) = HeaderValue::from_str(digest) {
        headers.insert("Docker-Content-Digest", value);
    }
    if let Ok(value) = HeaderValue::from_str(&data.len().to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers
}

pub async fn head(store: Arc<dyn ContentStore>, repository: &str, reference: &str) -> Response {
    match store.get_manifest(repository, reference).await {
        Ok((manifest, digest)) => {
            (StatusCode::OK, manifest_headers(&manifest, &digest)).into_response()
        }
        Err(GatewayError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "manifest unknown").into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn get(store: Arc<dyn ContentStore>, repository: &str, reference: &str) -> Response {
    // Digest-form references bypass tag resolution inside the store.
    match store.get_manifest(repository, reference).await {
        Ok((manifest, digest)) => {
            let headers = manifest_headers(&manifest, &digest);
            (StatusCode::OK, headers, manifest).into_response()
        }
        Err(GatewayError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "manifest unknown").into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn put(
    store: Arc<dyn ContentStore>,
    repository: &str,
    reference: &str,
    request: Request,
) -> Response {
    let body = match read_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    // The digest is computed over the verbatim request body, so it matches
    // what any other implementation computes on the same bytes.
    let digest = compute_digest(&body);

    if let Err(e) = validate_manifest(&body) {
        return error_response(e);
    }

    if let Err(e) = store
        .put_manifest(repository, reference, &digest, &body)
        .await
    {
        tracing::error!(
            repository = %repository,
            reference = %reference,
            digest = %digest,
            error = %e,
            "failed to store manifest"
        );
        return error_response(e);
    }

    tracing::debug!(repository = %repository, reference = %reference, digest = %digest, "manifest stored");
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&digest) {
        headers.insert("Docker-Content-Digest", value);
    }
    (StatusCode::CREATED, headers).into_response()
}

pub async fn delete(store: Arc<dyn ContentStore>, repository: &str, reference: &str) -> Response {
    match store.delete_manifest(repository, reference).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(GatewayError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "manifest unknown").into_response()
        }
        Err(e) => error_response(e),
    }
}
