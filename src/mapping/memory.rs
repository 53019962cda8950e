use super::{ConfigStore, RegistryMapping};
use crate::error::{GatewayError, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory config store. Ephemeral; readers do not block each other.
#[derive(Default)]
pub struct MemoryConfigStore {
    mappings: RwLock<HashMap<String, RegistryMapping>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        MemoryConfigStore {
            mappings: RwLock::new(HashMap::new()),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, host_name: &str) -> Result<Option<RegistryMapping>> {
        let mappings = self
            .mappings
            .read()
            .map_err(|_| GatewayError::Storage("config store lock poisoned".to_string()))?;
        Ok(mappings.get(host_name).cloned())
    }

    fn list(&self) -> Result<Vec<RegistryMapping>> {
        let mappings = self
            .mappings
            .read()
            .map_err(|_| GatewayError::Storage("config store lock poisoned".to_string()))?;
        let mut listed: Vec<RegistryMapping> =
            mappings.values().map(RegistryMapping::sanitized).collect();
        listed.sort_by(|a, b| a.host_name.cmp(&b.host_name));
        Ok(listed)
    }

    fn add(&self, mapping: RegistryMapping) -> Result<()> {
        if mapping.host_name.is_empty() {
            return Err(GatewayError::Config("mapping host name is empty".to_string()));
        }
        let mut mappings = self
            .mappings
            .write()
            .map_err(|_| GatewayError::Storage("config store lock poisoned".to_string()))?;
        mappings.insert(mapping.host_name.clone(), mapping);
        Ok(())
    }

    fn remove(&self, host_name: &str) -> Result<bool> {
        let mut mappings = self
            .mappings
            .write()
            .map_err(|_| GatewayError::Storage("config store lock poisoned".to_string()))?;
        Ok(mappings.remove(host_name).is_some())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
