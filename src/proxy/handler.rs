use super::transport;
use crate::error::{GatewayError, Result};
use crate::mapping::RegistryMapping;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use std::time::Duration;
use tokio::io::BufReader;
use tokio_util::io::{ReaderStream, StreamReader};
use url::Url;

/// Bodies above this size are read through a buffered reader.
const LARGE_BODY_THRESHOLD: u64 = 10 * 1024 * 1024;
const LARGE_BODY_BUFFER: usize = 1024 * 1024;

/// Reverse proxy for one upstream mapping.
///
/// Upstream TLS verification is disabled on purpose: the gateway fronts
/// arbitrary hostnames and intercepts transparently.
pub struct ProxyHandler {
    host_name: String,
    remote: Url,
    client: reqwest::Client,
    auth: Option<(String, String)>,
}

impl ProxyHandler {
    pub fn new(mapping: &RegistryMapping) -> Result<Self> {
        let remote = Url::parse(&mapping.remote_url).map_err(|e| {
            GatewayError::Config(format!(
                "invalid remote URL {}: {}",
                mapping.remote_url, e
            ))
        })?;
        if !remote.has_host() {
            return Err(GatewayError::Config(format!(
                "remote URL has no host: {}",
                mapping.remote_url
            )));
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(5 * 60))
            .tcp_keepalive(Duration::from_secs(30 * 60))
            .pool_idle_timeout(Duration::from_secs(60 * 60))
            .pool_max_idle_per_host(20)
            .build()?;

        let auth = match (&mapping.username, &mapping.password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user.clone(), pass.clone()))
            }
            _ => None,
        };

        Ok(ProxyHandler {
            host_name: mapping.host_name.clone(),
            remote,
            client,
            auth,
        })
    }

    pub fn remote_url(&self) -> &Url {
        &self.remote
    }

    /// Stream the request to the upstream and the response back.
    ///
    /// Upstream 4xx/5xx responses are forwarded verbatim so clients see
    /// real authentication challenges; only transport failures become 502.
    pub async fn forward(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let mut target = self.remote.clone();
        target.set_path(parts.uri.path());
        target.set_query(parts.uri.query());

        // The Host header is rewritten implicitly: reqwest derives it from
        // the upstream URL.
        let mut headers = parts.headers.clone();
        headers.remove(header::HOST);

        let mut builder = self
            .client
            .request(parts.method.clone(), target.clone())
            .headers(headers);
        if let Some((user, pass)) = &self.auth {
            // Keep client-supplied credentials when present.
            if !parts.headers.contains_key(header::AUTHORIZATION) {
                builder = builder.basic_auth(user, Some(pass));
            }
        }
        let builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));

        let upstream_request = match builder.build() {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(host = %self.host_name, error = %e, "failed to build upstream request");
                return (
                    StatusCode::BAD_GATEWAY,
                    format!("registry proxy error: {}", e),
                )
                    .into_response();
            }
        };

        tracing::debug!(
            host = %self.host_name,
            method = %parts.method,
            path = %parts.uri.path(),
            target = %target,
            "proxying request to upstream"
        );

        match transport::send_following_redirects(&self.client, upstream_request).await {
            Ok(upstream) => relay_response(upstream),
            Err(e) => {
                tracing::error!(
                    host = %self.host_name,
                    method = %parts.method,
                    path = %parts.uri.path(),
                    error = %e,
                    "upstream request failed"
                );
                (
                    StatusCode::BAD_GATEWAY,
                    format!("registry proxy error: {}", e),
                )
                    .into_response()
            }
        }
    }
}

fn relay_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        headers.append(name, value.clone());
    }

    let content_length = upstream.content_length();
    let stream = upstream.bytes_stream().map_err(std::io::Error::other);
    let body = if content_length.is_some_and(|len| len > LARGE_BODY_THRESHOLD) {
        // Smooth out syscall cadence on large blobs without buffering the
        // whole body.
        let reader = BufReader::with_capacity(LARGE_BODY_BUFFER, StreamReader::new(stream));
        Body::from_stream(ReaderStream::new(reader))
    } else {
        Body::from_stream(stream)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
