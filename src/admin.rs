//! Admin REST surface over the mapping store.

use crate::error::GatewayError;
use crate::mapping::RegistryMapping;
use crate::proxy::Manager;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub fn build_admin_router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/api/registries", get(list_registries).post(add_registry))
        .route(
            "/api/registries/:host",
            get(get_registry).put(update_registry).delete(delete_registry),
        )
        .route("/api/v1/health", get(health))
        .with_state(manager)
}

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn list_registries(State(manager): State<Arc<Manager>>) -> Response {
    match manager.list_mappings() {
        Ok(mappings) => Json(mappings).into_response(),
        Err(e) => admin_error(e),
    }
}

async fn add_registry(
    State(manager): State<Arc<Manager>>,
    payload: Result<Json<RegistryMapping>, JsonRejection>,
) -> Response {
    let Json(mapping) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, rejection.to_string()).into_response();
        }
    };
    match manager.add_mapping(mapping) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => admin_error(e),
    }
}

async fn get_registry(State(manager): State<Arc<Manager>>, Path(host): Path<String>) -> Response {
    match manager.mapping_for(&host) {
        Some(mapping) => Json(mapping.sanitized()).into_response(),
        None => (StatusCode::NOT_FOUND, "Registry not found").into_response(),
    }
}

async fn update_registry(
    State(manager): State<Arc<Manager>>,
    Path(host): Path<String>,
    payload: Result<Json<RegistryMapping>, JsonRejection>,
) -> Response {
    let Json(mut mapping) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, rejection.to_string()).into_response();
        }
    };
    // The host in the path wins over whatever the body says.
    mapping.host_name = host;
    match manager.add_mapping(mapping.clone()) {
        Ok(()) => Json(mapping.sanitized()).into_response(),
        Err(e) => admin_error(e),
    }
}

async fn delete_registry(
    State(manager): State<Arc<Manager>>,
    Path(host): Path<String>,
) -> Response {
    match manager.remove_mapping(&host) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Registry not found").into_response(),
        Err(e) => admin_error(e),
    }
}

fn admin_error(err: GatewayError) -> Response {
    match &err {
        GatewayError::Config(_) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
