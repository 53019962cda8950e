use thiserror::Error;

/// Error type shared across the gateway.
///
/// Handler code maps these onto HTTP statuses: `NotFound` becomes 404,
/// `Registry` and `DigestMismatch` become 400, `Storage` becomes 500 and
/// `Http` becomes 502. `Config` and `Tls` are fatal during startup.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    #[error("upstream error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
