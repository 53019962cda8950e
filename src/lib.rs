//! Multi-tenant Docker/OCI registry gateway.
//!
//! Requests addressed to configured upstream hostnames are transparently
//! reverse-proxied (with redirect following and credential injection);
//! everything else is served by a local Registry V2 engine over a
//! content-addressed store. A persistent root CA mints leaf certificates
//! per SNI so clients trusting only the local CA can speak TLS to any
//! upstream hostname through the gateway.

pub mod admin;
pub mod certs;
pub mod error;
pub mod mapping;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod store;

pub use certs::CertificateAuthority;
pub use error::{GatewayError, Result};
pub use mapping::{ConfigStore, RegistryMapping};
pub use proxy::Manager;
pub use server::GatewayState;
pub use store::{ContentStore, FileContentStore, MemoryContentStore};
