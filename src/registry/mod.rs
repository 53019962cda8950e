//! The local Registry V2 protocol engine.
//!
//! One entrypoint handles every `/v2` request: the path is normalized,
//! parsed by locating the keyword segments `manifests`, `tags` and
//! `blobs` (repository names may contain any number of slashes), and
//! dispatched to the manifest, blob or upload handlers.

pub mod blob;
pub mod manifest;
pub mod upload;

use crate::error::GatewayError;
use crate::store::ContentStore;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::sync::Arc;

pub const API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";
pub const API_VERSION_VALUE: &str = "registry/2.0";

/// Parsed shape of a `/v2` request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V2Route {
    Version,
    Catalog,
    TagsList {
        repository: String,
    },
    Manifest {
        repository: String,
        reference: String,
    },
    Blob {
        repository: String,
        digest: String,
    },
    UploadInit {
        repository: String,
    },
    Upload {
        repository: String,
        upload_id: String,
    },
}

/// Collapse duplicate slashes so `/v2//foo//manifests//latest` parses.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        normalized.push(c);
    }
    normalized
}

/// Parse a normalized path into a route. `None` means 404.
pub fn parse_route(path: &str) -> Option<V2Route> {
    let rest = path.strip_prefix("/v2")?;
    let parts: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    if parts.is_empty() {
        return Some(V2Route::Version);
    }
    if parts.len() == 1 && parts[0] == "_catalog" {
        return Some(V2Route::Catalog);
    }
    if parts.len() < 2 {
        return None;
    }

    // Locate the last occurrence of each keyword segment; everything
    // before it is the repository name.
    let mut manifests_index = None;
    let mut tags_index = None;
    let mut blobs_index = None;
    for (i, part) in parts.iter().enumerate() {
        match *part {
            "manifests" => manifests_index = Some(i),
            "tags" => tags_index = Some(i),
            "blobs" => blobs_index = Some(i),
            _ => {}
        }
    }

    if let Some(idx) = manifests_index {
        if idx > 0 && idx + 1 < parts.len() {
            return Some(V2Route::Manifest {
                repository: parts[..idx].join("/"),
                reference: parts[idx + 1].to_string(),
            });
        }
    }

    if let Some(idx) = tags_index {
        if idx > 0 && idx + 1 < parts.len() && parts[idx + 1] == "list" {
            return Some(V2Route::TagsList {
                repository: parts[..idx].join("/"),
            });
        }
    }

    if let Some(idx) = blobs_index {
        if idx > 0 {
            let repository = parts[..idx].join("/");
            if parts.get(idx + 1) == Some(&"uploads") {
                return match parts.get(idx + 2) {
                    None => Some(V2Route::UploadInit { repository }),
                    Some(upload_id) => Some(V2Route::Upload {
                        repository,
                        upload_id: upload_id.to_string(),
                    }),
                };
            }
            if let Some(digest) = parts.get(idx + 1) {
                return Some(V2Route::Blob {
                    repository,
                    digest: digest.to_string(),
                });
            }
        }
    }

    None
}

/// Entry point for every local-registry request.
pub async fn handle(store: Arc<dyn ContentStore>, request: Request) -> Response {
    let path = normalize_path(request.uri().path());
    let mut response = match parse_route(&path) {
        Some(route) => dispatch(store, route, request).await,
        None => (StatusCode::NOT_FOUND, "404 page not found").into_response(),
    };
    response.headers_mut().insert(
        API_VERSION_HEADER,
        HeaderValue::from_static(API_VERSION_VALUE),
    );
    response
}

async fn dispatch(store: Arc<dyn ContentStore>, route: V2Route, request: Request) -> Response {
    let method = request.method().clone();
    match route {
        V2Route::Version => match method {
            Method::GET => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                "{}",
            )
                .into_response(),
            _ => method_not_allowed(),
        },
        V2Route::Catalog => match method {
            Method::GET => handle_catalog(store).await,
            _ => method_not_allowed(),
        },
        V2Route::TagsList { repository } => match method {
            Method::GET => handle_tags_list(store, &repository).await,
            _ => method_not_allowed(),
        },
        V2Route::Manifest {
            repository,
            reference,
        } => match method {
            Method::HEAD => manifest::head(store, &repository, &reference).await,
            Method::GET => manifest::get(store, &repository, &reference).await,
            Method::PUT => manifest::put(store, &repository, &reference, request).await,
            Method::DELETE => manifest::delete(store, &repository, &reference).await,
            _ => method_not_allowed(),
        },
        V2Route::Blob { repository, digest } => match method {
            Method::HEAD => blob::head(store, &repository, &digest).await,
            Method::GET => blob::get(store, &repository, &digest).await,
            Method::DELETE => blob::delete(store, &repository, &digest).await,
            _ => method_not_allowed(),
        },
        V2Route::UploadInit { repository } => match method {
            Method::POST => upload::initiate(store, &repository).await,
            _ => method_not_allowed(),
        },
        V2Route::Upload {
            repository,
            upload_id,
        } => match method {
            Method::PATCH => upload::patch(store, &repository, &upload_id, request).await,
            Method::PUT => upload::put(store, &repository, &upload_id, request).await,
            Method::HEAD => upload::head(store, &repository, &upload_id).await,
            Method::DELETE => upload::delete(store, &repository, &upload_id).await,
            _ => method_not_allowed(),
        },
    }
}

fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response()
}

async fn handle_catalog(store: Arc<dyn ContentStore>) -> Response {
    match store.list_repositories().await {
        Ok(repositories) => axum::Json(json!({ "repositories": repositories })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_tags_list(store: Arc<dyn ContentStore>, repository: &str) -> Response {
    match store.list_tags(repository).await {
        Ok(tags) => axum::Json(json!({ "name": repository, "tags": tags })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Map store and engine errors onto the wire statuses of the taxonomy.
pub(crate) fn error_response(err: GatewayError) -> Response {
    match &err {
        GatewayError::NotFound(what) => {
            (StatusCode::NOT_FOUND, format!("not found: {}", what)).into_response()
        }
        GatewayError::DigestMismatch { .. } | GatewayError::Registry(_) | GatewayError::Config(_) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        GatewayError::Http(_) => (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Read a request body fully into memory.
pub(crate) async fn read_body(request: Request) -> Result<bytes::Bytes, Response> {
    axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("failed to read body: {}", e)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_duplicate_slashes() {
        assert_eq!(
            normalize_path("/v2//foo//manifests//latest"),
            "/v2/foo/manifests/latest"
        );
        assert_eq!(normalize_path("/v2/"), "/v2/");
    }

    #[test]
    fn parses_version_and_catalog() {
        assert_eq!(parse_route("/v2"), Some(V2Route::Version));
        assert_eq!(parse_route("/v2/"), Some(V2Route::Version));
        assert_eq!(parse_route("/v2/_catalog"), Some(V2Route::Catalog));
        assert_eq!(parse_route("/api/registries"), None);
    }

    #[test]
    fn parses_deep_repository_names() {
        assert_eq!(
            parse_route("/v2/user/project/tool/manifests/latest"),
            Some(V2Route::Manifest {
                repository: "user/project/tool".to_string(),
                reference: "latest".to_string(),
            })
        );
        assert_eq!(
            parse_route("/v2/library/nginx/tags/list"),
            Some(V2Route::TagsList {
                repository: "library/nginx".to_string(),
            })
        );
        assert_eq!(
            parse_route("/v2/a/b/c/blobs/sha256:abc"),
            Some(V2Route::Blob {
                repository: "a/b/c".to_string(),
                digest: "sha256:abc".to_string(),
            })
        );
    }

    #[test]
    fn parses_upload_routes() {
        assert_eq!(
            parse_route("/v2/acme/widget/blobs/uploads/"),
            Some(V2Route::UploadInit {
                repository: "acme/widget".to_string(),
            })
        );
        assert_eq!(
            parse_route("/v2/acme/widget/blobs/uploads/abc-123"),
            Some(V2Route::Upload {
                repository: "acme/widget".to_string(),
                upload_id: "abc-123".to_string(),
            })
        );
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert_eq!(parse_route("/v2/onlyrepo"), None);
        assert_eq!(parse_route("/v2/repo/unknownop/x"), None);
    }
}
