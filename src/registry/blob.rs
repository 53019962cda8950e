use super::error_response;
use crate::error::GatewayError;
use crate::store::ContentStore;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

fn blob_headers(digest: &str, size: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(digest) {
        headers.insert("Docker-Content-Digest", value);
    }
    if let Ok(value) = HeaderValue::from_str(&size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers
}

pub async fn head(store: Arc<dyn ContentStore>, repository: &str, digest: &str) -> Response {
    match store.get_blob_size(repository, digest).await {
        Ok(size) => (StatusCode::OK, blob_headers(digest, size)).into_response(),
        Err(GatewayError::NotFound(_)) => (StatusCode::NOT_FOUND, "blob unknown").into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get(store: Arc<dyn ContentStore>, repository: &str, digest: &str) -> Response {
    match store.get_blob(repository, digest).await {
        Ok((reader, size)) => {
            // Streamed so one large blob read cannot hold the body in memory.
            let body = Body::from_stream(ReaderStream::new(reader));
            (StatusCode::OK, blob_headers(digest, size), body).into_response()
        }
        Err(GatewayError::NotFound(_)) => (StatusCode::NOT_FOUND, "blob unknown").into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete(store: Arc<dyn ContentStore>, repository: &str, digest: &str) -> Response {
    match store.delete_blob(repository, digest).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(GatewayError::NotFound(_)) => (StatusCode::NOT_FOUND, "blob unknown").into_response(),
        Err(e) => error_response(e),
    }
}
