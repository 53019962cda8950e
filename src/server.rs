//! Gateway entrypoints: Host-based dispatch between the reverse proxy and
//! the local registry, plus the HTTP/HTTPS serving plumbing.

use crate::certs::{
    build_tls_server_config, load_certified_key, CertificateAuthority, SniResolver,
};
use crate::error::Result;
use crate::mapping::ConfigStore;
use crate::proxy::Manager;
use crate::registry;
use crate::store::ContentStore;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state of the combined proxy + local-registry surface.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<Manager>,
    pub content: Arc<dyn ContentStore>,
}

/// Router shared by the plain and TLS listeners.
pub fn build_gateway_router(state: GatewayState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

/// Router for a dedicated local-registry listener.
pub fn build_registry_router(content: Arc<dyn ContentStore>) -> Router {
    Router::new()
        .fallback(registry_only)
        .with_state(RegistryOnly(content))
}

#[derive(Clone)]
struct RegistryOnly(Arc<dyn ContentStore>);

async fn registry_only(State(RegistryOnly(store)): State<RegistryOnly>, request: Request) -> Response {
    registry::handle(store, request).await
}

/// Route by the request's Host: a configured mapping goes to the reverse
/// proxy, everything else is assumed to target the local registry.
async fn dispatch(State(state): State<GatewayState>, request: Request) -> Response {
    let host = request_host(&request);
    if !host.is_empty() {
        if let Some(mapping) = state.manager.mapping_for(&host) {
            tracing::debug!(host = %host, remote = %mapping.remote_url, "dispatching to upstream proxy");
            return match state.manager.handler_for(&mapping) {
                Ok(handler) => handler.forward(request).await,
                Err(e) => {
                    tracing::error!(host = %host, error = %e, "failed to build proxy handler");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create proxy").into_response()
                }
            };
        }
    }
    registry::handle(state.content.clone(), request).await
}

fn request_host(request: &Request) -> String {
    let raw = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default();
    // Drop the port, if any.
    match raw.split_once(':') {
        Some((host, _)) => host.to_string(),
        None => raw,
    }
}

/// TLS listener configuration.
pub struct TlsOptions {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Mint per-SNI leaves from the built-in CA when no pair is given.
    pub auto_tls: bool,
}

/// Build the rustls config for the TLS listeners, or `None` when TLS is
/// disabled (no operator pair and auto-TLS off).
pub fn build_tls_config(
    authority: Arc<CertificateAuthority>,
    mappings: Arc<dyn ConfigStore>,
    options: &TlsOptions,
) -> Result<Option<Arc<rustls::ServerConfig>>> {
    let operator = match (&options.cert_file, &options.key_file) {
        (Some(cert), Some(key)) => Some(load_certified_key(cert, key)?),
        _ => None,
    };
    if operator.is_none() && !options.auto_tls {
        return Ok(None);
    }
    let resolver = SniResolver::new(authority, mappings, operator);
    Ok(Some(build_tls_server_config(resolver)))
}

/// Serve plain HTTP on an already-bound listener.
pub async fn serve_http(
    listener: std::net::TcpListener,
    router: Router,
    handle: axum_server::Handle,
) -> std::io::Result<()> {
    axum_server::from_tcp(listener)
        .handle(handle)
        .serve(router.into_make_service())
        .await
}

/// Serve HTTPS on an already-bound listener.
pub async fn serve_tls(
    listener: std::net::TcpListener,
    config: Arc<rustls::ServerConfig>,
    router: Router,
    handle: axum_server::Handle,
) -> std::io::Result<()> {
    let rustls_config = axum_server::tls_rustls::RustlsConfig::from_config(config);
    axum_server::from_tcp_rustls(listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await
}
