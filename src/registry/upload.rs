use super::{error_response, read_body};
use crate::error::GatewayError;
use crate::store::ContentStore;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use uuid::Uuid;

fn upload_headers(repository: &str, upload_id: &str, offset: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let location = format!("/v2/{}/blobs/uploads/{}", repository, upload_id);
    if let Ok(value) = HeaderValue::from_str(&location) {
        headers.insert("Location", value);
    }
    let range = format!("0-{}", offset.saturating_sub(1));
    if let Ok(value) = HeaderValue::from_str(&range) {
        headers.insert("Range", value);
    }
    if let Ok(value) = HeaderValue::from_str(upload_id) {
        headers.insert("Docker-Upload-UUID", value);
    }
    headers
}

fn digest_param(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "digest")
        .map(|(_, value)| value.into_owned())
}

pub async fn initiate(store: Arc<dyn ContentStore>, repository: &str) -> Response {
    let upload_id = Uuid::new_v4().to_string();
    if let Err(e) = store.initiate_upload(repository, &upload_id).await {
        tracing::error!(repository = %repository, error = %e, "failed to initiate upload");
        return error_response(e);
    }
    tracing::debug!(repository = %repository, upload_id = %upload_id, "upload session started");
    (
        StatusCode::ACCEPTED,
        upload_headers(repository, &upload_id, 0),
    )
        .into_response()
}

pub async fn patch(
    store: Arc<dyn ContentStore>,
    repository: &str,
    upload_id: &str,
    request: Request,
) -> Response {
    let body = match read_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    match store.append_to_upload(repository, upload_id, &body).await {
        Ok(offset) => (
            StatusCode::ACCEPTED,
            upload_headers(repository, upload_id, offset),
        )
            .into_response(),
        Err(GatewayError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "blob upload unknown").into_response()
        }
        Err(e) => {
            tracing::error!(
                repository = %repository,
                upload_id = %upload_id,
                error = %e,
                "failed to append to upload"
            );
            error_response(e)
        }
    }
}

pub async fn put(
    store: Arc<dyn ContentStore>,
    repository: &str,
    upload_id: &str,
    request: Request,
) -> Response {
    let digest = match digest_param(&request) {
        Some(digest) => digest,
        None => {
            return (StatusCode::BAD_REQUEST, "digest parameter required").into_response();
        }
    };

    // The body, if any, carries the trailing bytes. A PUT with no prior
    // PATCH and the whole blob in the body is accepted.
    let body = match read_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    match store
        .complete_upload(repository, upload_id, &digest, &body)
        .await
    {
        Ok(()) => {
            tracing::debug!(
                repository = %repository,
                upload_id = %upload_id,
                digest = %digest,
                "upload finalized"
            );
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&format!("/v2/{}/blobs/{}", repository, digest))
            {
                headers.insert("Location", value);
            }
            if let Ok(value) = HeaderValue::from_str(&digest) {
                headers.insert("Docker-Content-Digest", value);
            }
            (StatusCode::CREATED, headers).into_response()
        }
        Err(GatewayError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "blob upload unknown").into_response()
        }
        Err(e @ GatewayError::DigestMismatch { .. }) => {
            tracing::warn!(
                repository = %repository,
                upload_id = %upload_id,
                digest = %digest,
                "upload digest mismatch"
            );
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(
                repository = %repository,
                upload_id = %upload_id,
                digest = %digest,
                error = %e,
                "failed to finalize upload"
            );
            error_response(e)
        }
    }
}

pub async fn head(store: Arc<dyn ContentStore>, repository: &str, upload_id: &str) -> Response {
    match store.upload_offset(repository, upload_id).await {
        Ok(offset) => (
            StatusCode::NO_CONTENT,
            upload_headers(repository, upload_id, offset),
        )
            .into_response(),
        Err(GatewayError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "blob upload unknown").into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn delete(store: Arc<dyn ContentStore>, repository: &str, upload_id: &str) -> Response {
    match store.cancel_upload(repository, upload_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(GatewayError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "blob upload unknown").into_response()
        }
        Err(e) => error_response(e),
    }
}
