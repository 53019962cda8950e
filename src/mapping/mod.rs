//! Registry mapping configuration: which upstream each hostname proxies to.

mod file;
mod memory;

pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

/// One upstream registry mapping, keyed by the hostname clients connect with.
///
/// Serialized field names match the persisted JSON config format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMapping {
    pub host_name: String,
    pub remote_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_names: Option<Vec<String>>,
}

impl RegistryMapping {
    pub fn new(host_name: impl Into<String>, remote_url: impl Into<String>) -> Self {
        RegistryMapping {
            host_name: host_name.into(),
            remote_url: remote_url.into(),
            username: None,
            password: None,
            dns_names: None,
        }
    }

    /// DNS names to put on a minted leaf certificate for this mapping.
    pub fn dns_names(&self) -> Vec<String> {
        match &self.dns_names {
            Some(names) if !names.is_empty() => names.clone(),
            _ => vec![self.host_name.clone()],
        }
    }

    /// Copy with credentials stripped, for listing surfaces.
    pub fn sanitized(&self) -> RegistryMapping {
        RegistryMapping {
            host_name: self.host_name.clone(),
            remote_url: self.remote_url.clone(),
            username: None,
            password: None,
            dns_names: self.dns_names.clone(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        matches!((&self.username, &self.password), (Some(u), Some(p)) if !u.is_empty() && !p.is_empty())
    }
}

/// Keyed store of registry mappings.
///
/// `get` returns the full record including credentials; `list` returns
/// sanitized copies. Mutations serialize against readers.
pub trait ConfigStore: Send + Sync {
    fn get(&self, host_name: &str) -> Result<Option<RegistryMapping>>;
    fn list(&self) -> Result<Vec<RegistryMapping>>;
    fn add(&self, mapping: RegistryMapping) -> Result<()>;
    fn remove(&self, host_name: &str) -> Result<bool>;
    fn close(&self) -> Result<()>;
}

/// Build a config store of the requested kind.
pub fn create_config_store(
    store_type: &str,
    path: Option<&str>,
) -> Result<std::sync::Arc<dyn ConfigStore>> {
    match store_type {
        "memory" => Ok(std::sync::Arc::new(MemoryConfigStore::new())),
        "file" => {
            let path = path.ok_or_else(|| {
                GatewayError::Config("file path is required for file config store".to_string())
            })?;
            Ok(std::sync::Arc::new(FileConfigStore::open(path)?))
        }
        other => Err(GatewayError::Config(format!(
            "unsupported config store type: {}",
            other
        ))),
    }
}

/// The well-known upstreams seeded on startup when not already present.
pub fn default_mappings() -> Vec<RegistryMapping> {
    vec![
        RegistryMapping::new("docker.io", "https://registry-1.docker.io"),
        RegistryMapping::new("registry-1.docker.io", "https://registry-1.docker.io"),
        RegistryMapping::new("auth.docker.io", "https://auth.docker.io"),
        RegistryMapping::new("gcr.io", "https://gcr.io"),
        RegistryMapping::new("k8s.gcr.io", "https://k8s.gcr.io"),
        RegistryMapping::new("quay.io", "https://quay.io"),
        RegistryMapping::new("ghcr.io", "https://ghcr.io"),
        RegistryMapping::new("registry.k8s.io", "https://registry.k8s.io"),
        RegistryMapping::new("mcr.microsoft.com", "https://mcr.microsoft.com"),
    ]
}

/// Parse the `REGISTRY_MAPPINGS=host1=url1,host2=url2` environment format.
///
/// Entries are whitespace-trimmed; malformed ones are skipped with a warning.
pub fn mappings_from_env(value: &str) -> Vec<RegistryMapping> {
    let mut mappings = Vec::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('=') {
            Some((host, url)) if !host.trim().is_empty() && !url.trim().is_empty() => {
                mappings.push(RegistryMapping::new(host.trim(), url.trim()));
            }
            _ => {
                tracing::warn!(entry = %entry, "skipping malformed REGISTRY_MAPPINGS entry");
            }
        }
    }
    mappings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_mappings_trim_and_skip_malformed() {
        let parsed = mappings_from_env(" a.io = https://a.example ,bogus, b.io=https://b.example ,");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].host_name, "a.io");
        assert_eq!(parsed[0].remote_url, "https://a.example");
        assert_eq!(parsed[1].host_name, "b.io");
    }

    #[test]
    fn dns_names_fall_back_to_host() {
        let mapping = RegistryMapping::new("docker.io", "https://registry-1.docker.io");
        assert_eq!(mapping.dns_names(), vec!["docker.io".to_string()]);

        let mut aliased = mapping.clone();
        aliased.dns_names = Some(vec!["docker.io".to_string(), "hub.local".to_string()]);
        assert_eq!(aliased.dns_names().len(), 2);
    }

    #[test]
    fn sanitized_strips_credentials() {
        let mut mapping = RegistryMapping::new("quay.io", "https://quay.io");
        mapping.username = Some("robot".to_string());
        mapping.password = Some("secret".to_string());
        let safe = mapping.sanitized();
        assert!(safe.username.is_none());
        assert!(safe.password.is_none());
        assert_eq!(safe.host_name, "quay.io");
    }
}
