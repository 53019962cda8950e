//! Config store contract tests for the memory and file variants.

use registry_gateway::mapping::{
    create_config_store, default_mappings, ConfigStore, FileConfigStore, MemoryConfigStore,
    RegistryMapping,
};
use registry_gateway::proxy::Manager;
use std::sync::Arc;
use tempfile::TempDir;

fn with_credentials(host: &str, url: &str) -> RegistryMapping {
    let mut mapping = RegistryMapping::new(host, url);
    mapping.username = Some("robot".to_string());
    mapping.password = Some("secret".to_string());
    mapping
}

#[test]
fn memory_store_lifecycle() {
    let store = MemoryConfigStore::new();
    assert!(store.get("docker.io").unwrap().is_none());

    store
        .add(with_credentials("docker.io", "https://registry-1.docker.io"))
        .unwrap();

    let full = store.get("docker.io").unwrap().unwrap();
    assert_eq!(full.username.as_deref(), Some("robot"));

    // Listing never reveals credentials.
    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].username.is_none());
    assert!(listed[0].password.is_none());

    assert!(store.remove("docker.io").unwrap());
    assert!(!store.remove("docker.io").unwrap());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn add_is_idempotent_on_key() {
    let store = MemoryConfigStore::new();
    store
        .add(RegistryMapping::new("quay.io", "https://quay.io"))
        .unwrap();
    store
        .add(RegistryMapping::new("quay.io", "https://mirror.quay.io"))
        .unwrap();

    assert_eq!(store.list().unwrap().len(), 1);
    assert_eq!(
        store.get("quay.io").unwrap().unwrap().remote_url,
        "https://mirror.quay.io"
    );
}

#[test]
fn file_store_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registries.json");

    {
        let store = FileConfigStore::open(&path).unwrap();
        store
            .add(with_credentials("ghcr.io", "https://ghcr.io"))
            .unwrap();
        store
            .add(RegistryMapping::new("gcr.io", "https://gcr.io"))
            .unwrap();
        store.remove("gcr.io").unwrap();
    }

    let reopened = FileConfigStore::open(&path).unwrap();
    assert!(reopened.get("gcr.io").unwrap().is_none());

    // Credentials round-trip through the file.
    let full = reopened.get("ghcr.io").unwrap().unwrap();
    assert_eq!(full.username.as_deref(), Some("robot"));
    assert_eq!(full.password.as_deref(), Some("secret"));
}

#[test]
fn file_store_missing_file_is_empty() {
    let temp = TempDir::new().unwrap();
    let store = FileConfigStore::open(temp.path().join("absent.json")).unwrap();
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn factory_rejects_file_without_path() {
    assert!(create_config_store("file", None).is_err());
    assert!(create_config_store("carrier-pigeon", None).is_err());
    assert!(create_config_store("memory", None).is_ok());
}

#[test]
fn manager_seeds_defaults_without_clobbering() {
    let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
    store
        .add(RegistryMapping::new("docker.io", "https://mirror.internal"))
        .unwrap();

    let manager = Manager::new(store.clone());
    manager.seed_defaults();

    // The pre-existing mapping wins; everything else is seeded.
    assert_eq!(
        store.get("docker.io").unwrap().unwrap().remote_url,
        "https://mirror.internal"
    );
    for expected in default_mappings() {
        assert!(
            store.get(&expected.host_name).unwrap().is_some(),
            "missing default {}",
            expected.host_name
        );
    }
}

#[test]
fn manager_rejects_invalid_remote_urls() {
    let manager = Manager::new(Arc::new(MemoryConfigStore::new()));
    assert!(manager
        .add_mapping(RegistryMapping::new("bad.example", "not a url"))
        .is_err());
    assert!(manager
        .add_mapping(RegistryMapping::new("", "https://ok.example"))
        .is_err());
}
