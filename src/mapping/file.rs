use super::{ConfigStore, MemoryConfigStore, RegistryMapping};
use crate::error::{GatewayError, Result};
use std::path::{Path, PathBuf};

/// File-backed config store: the in-memory store plus a JSON save after
/// every mutation. A missing file on open is treated as an empty store.
pub struct FileConfigStore {
    inner: MemoryConfigStore,
    path: PathBuf,
}

impl FileConfigStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = FileConfigStore {
            inner: MemoryConfigStore::new(),
            path: path.as_ref().to_path_buf(),
        };
        if store.path.exists() {
            store.load()?;
        }
        Ok(store)
    }

    fn load(&self) -> Result<()> {
        let data = std::fs::read(&self.path).map_err(|e| {
            GatewayError::Storage(format!(
                "failed to read config file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let mappings: Vec<RegistryMapping> = serde_json::from_slice(&data).map_err(|e| {
            GatewayError::Storage(format!(
                "failed to parse config file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        for mapping in mappings {
            self.inner.add(mapping)?;
        }
        Ok(())
    }

    /// Persist the full records, credentials included.
    fn save(&self) -> Result<()> {
        let mut full = Vec::new();
        for listed in self.inner.list()? {
            if let Some(mapping) = self.inner.get(&listed.host_name)? {
                full.push(mapping);
            }
        }

        let data = serde_json::to_vec_pretty(&full)
            .map_err(|e| GatewayError::Storage(format!("failed to encode config: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::Storage(format!("failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(&self.path, data).map_err(|e| {
            GatewayError::Storage(format!(
                "failed to write config file {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self, host_name: &str) -> Result<Option<RegistryMapping>> {
        self.inner.get(host_name)
    }

    fn list(&self) -> Result<Vec<RegistryMapping>> {
        self.inner.list()
    }

    fn add(&self, mapping: RegistryMapping) -> Result<()> {
        self.inner.add(mapping)?;
        // The in-memory state may now run ahead of the file if the save
        // fails; the caller sees the error and the next restart reloads
        // whatever was last persisted.
        self.save()
    }

    fn remove(&self, host_name: &str) -> Result<bool> {
        let removed = self.inner.remove(host_name)?;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
