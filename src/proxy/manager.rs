use super::ProxyHandler;
use crate::error::{GatewayError, Result};
use crate::mapping::{default_mappings, ConfigStore, RegistryMapping};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use url::Url;

/// Owns the config store and the per-hostname proxy handler cache.
///
/// The cache is strictly derived from the store: every mutation first goes
/// through the store and then drops the cached handler for that hostname,
/// so the next request rebuilds it with fresh credentials and URL.
pub struct Manager {
    store: Arc<dyn ConfigStore>,
    handlers: RwLock<HashMap<String, Arc<ProxyHandler>>>,
}

impl Manager {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Manager {
            store,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn ConfigStore> {
        self.store.clone()
    }

    /// Seed the well-known upstreams, keeping anything already configured.
    pub fn seed_defaults(&self) {
        for mapping in default_mappings() {
            match self.store.get(&mapping.host_name) {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    if let Err(e) = self.add_mapping(mapping.clone()) {
                        tracing::warn!(host = %mapping.host_name, error = %e, "failed to seed default mapping");
                    }
                }
                Err(e) => {
                    tracing::warn!(host = %mapping.host_name, error = %e, "failed to check default mapping");
                }
            }
        }
    }

    /// Merge externally supplied mappings (environment overrides).
    pub fn merge(&self, mappings: Vec<RegistryMapping>) {
        for mapping in mappings {
            let host = mapping.host_name.clone();
            if let Err(e) = self.add_mapping(mapping) {
                tracing::warn!(host = %host, error = %e, "failed to merge mapping");
            }
        }
    }

    pub fn mapping_for(&self, host_name: &str) -> Option<RegistryMapping> {
        match self.store.get(host_name) {
            Ok(mapping) => mapping,
            Err(e) => {
                tracing::error!(host = %host_name, error = %e, "failed to look up mapping");
                None
            }
        }
    }

    pub fn list_mappings(&self) -> Result<Vec<RegistryMapping>> {
        self.store.list()
    }

    /// Add or update a mapping. The remote URL must parse to an absolute
    /// URL with a host.
    pub fn add_mapping(&self, mapping: RegistryMapping) -> Result<()> {
        if mapping.host_name.is_empty() {
            return Err(GatewayError::Config("mapping host name is empty".to_string()));
        }
        let parsed = Url::parse(&mapping.remote_url).map_err(|e| {
            GatewayError::Config(format!("invalid remote URL {}: {}", mapping.remote_url, e))
        })?;
        if !parsed.has_host() {
            return Err(GatewayError::Config(format!(
                "remote URL has no host: {}",
                mapping.remote_url
            )));
        }

        let host = mapping.host_name.clone();
        let remote = mapping.remote_url.clone();
        self.store.add(mapping)?;
        self.invalidate(&host);
        tracing::info!(host = %host, remote = %remote, "registry mapping added");
        Ok(())
    }

    pub fn remove_mapping(&self, host_name: &str) -> Result<bool> {
        let removed = self.store.remove(host_name)?;
        if removed {
            self.invalidate(host_name);
            tracing::info!(host = %host_name, "registry mapping removed");
        }
        Ok(removed)
    }

    /// Cached reverse-proxy handler for a mapping, built on first use.
    /// Duplicate builds under a race are tolerated; the last insert wins.
    pub fn handler_for(&self, mapping: &RegistryMapping) -> Result<Arc<ProxyHandler>> {
        {
            let handlers = self
                .handlers
                .read()
                .map_err(|_| GatewayError::Storage("handler cache poisoned".to_string()))?;
            if let Some(handler) = handlers.get(&mapping.host_name) {
                return Ok(handler.clone());
            }
        }

        let handler = Arc::new(ProxyHandler::new(mapping)?);
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| GatewayError::Storage("handler cache poisoned".to_string()))?;
        handlers.insert(mapping.host_name.clone(), handler.clone());
        Ok(handler)
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    fn invalidate(&self, host_name: &str) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.remove(host_name);
        }
    }
}
