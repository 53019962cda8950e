use super::{is_digest, verify_digest, BlobReader, ContentStore};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::RwLock;

#[derive(Default)]
struct Repository {
    tags: HashMap<String, String>,
    manifests: HashMap<String, Vec<u8>>,
    blobs: HashMap<String, Vec<u8>>,
}

impl Repository {
    fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.manifests.is_empty() && self.blobs.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    repositories: HashMap<String, Repository>,
    // repository -> upload id -> accumulated bytes
    uploads: HashMap<String, HashMap<String, Vec<u8>>>,
}

/// Ephemeral content store guarded by one reader-writer lock.
#[derive(Default)]
pub struct MemoryContentStore {
    inner: RwLock<Inner>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        MemoryContentStore::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| GatewayError::Storage("content store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| GatewayError::Storage("content store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn list_repositories(&self) -> Result<Vec<String>> {
        let inner = self.read()?;
        let mut repos: Vec<String> = inner
            .repositories
            .iter()
            .filter(|(_, repo)| !repo.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        repos.sort();
        Ok(repos)
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let inner = self.read()?;
        let mut tags: Vec<String> = match inner.repositories.get(repository) {
            Some(repo) => repo.tags.keys().cloned().collect(),
            None => Vec::new(),
        };
        tags.sort();
        Ok(tags)
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        digest: &str,
        manifest: &[u8],
    ) -> Result<()> {
        let mut inner = self.write()?;
        let repo = inner.repositories.entry(repository.to_string()).or_default();
        repo.manifests.insert(digest.to_string(), manifest.to_vec());
        if !reference.is_empty() && !is_digest(reference) {
            repo.tags.insert(reference.to_string(), digest.to_string());
        }
        Ok(())
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<(Vec<u8>, String)> {
        if is_digest(reference) {
            return self.get_manifest_by_digest(repository, reference).await;
        }
        let digest = {
            let inner = self.read()?;
            let repo = inner
                .repositories
                .get(repository)
                .ok_or_else(|| GatewayError::NotFound(format!("repository: {}", repository)))?;
            repo.tags
                .get(reference)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(format!("tag: {}", reference)))?
        };
        self.get_manifest_by_digest(repository, &digest).await
    }

    async fn get_manifest_by_digest(
        &self,
        repository: &str,
        digest: &str,
    ) -> Result<(Vec<u8>, String)> {
        let inner = self.read()?;
        let repo = inner
            .repositories
            .get(repository)
            .ok_or_else(|| GatewayError::NotFound(format!("repository: {}", repository)))?;
        let manifest = repo
            .manifests
            .get(digest)
            .ok_or_else(|| GatewayError::NotFound(format!("manifest: {}", digest)))?;
        Ok((manifest.clone(), digest.to_string()))
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        let mut inner = self.write()?;
        let repo = inner
            .repositories
            .get_mut(repository)
            .ok_or_else(|| GatewayError::NotFound(format!("repository: {}", repository)))?;

        if is_digest(reference) {
            repo.manifests
                .remove(reference)
                .ok_or_else(|| GatewayError::NotFound(format!("manifest: {}", reference)))?;
            return Ok(());
        }

        let digest = repo
            .tags
            .remove(reference)
            .ok_or_else(|| GatewayError::NotFound(format!("tag: {}", reference)))?;

        // Keep the digest record while any other tag still points at it.
        let still_referenced = repo.tags.values().any(|d| *d == digest);
        if !still_referenced {
            repo.manifests.remove(&digest);
        }
        Ok(())
    }

    async fn get_blob(&self, repository: &str, digest: &str) -> Result<(BlobReader, u64)> {
        let inner = self.read()?;
        let repo = inner
            .repositories
            .get(repository)
            .ok_or_else(|| GatewayError::NotFound(format!("repository: {}", repository)))?;
        let blob = repo
            .blobs
            .get(digest)
            .ok_or_else(|| GatewayError::NotFound(format!("blob: {}", digest)))?;
        let size = blob.len() as u64;
        Ok((Box::new(Cursor::new(blob.clone())), size))
    }

    async fn get_blob_size(&self, repository: &str, digest: &str) -> Result<u64> {
        let inner = self.read()?;
        let repo = inner
            .repositories
            .get(repository)
            .ok_or_else(|| GatewayError::NotFound(format!("repository: {}", repository)))?;
        let blob = repo
            .blobs
            .get(digest)
            .ok_or_else(|| GatewayError::NotFound(format!("blob: {}", digest)))?;
        Ok(blob.len() as u64)
    }

    async fn delete_blob(&self, repository: &str, digest: &str) -> Result<()> {
        let mut inner = self.write()?;
        let repo = inner
            .repositories
            .get_mut(repository)
            .ok_or_else(|| GatewayError::NotFound(format!("repository: {}", repository)))?;
        repo.blobs
            .remove(digest)
            .ok_or_else(|| GatewayError::NotFound(format!("blob: {}", digest)))?;
        Ok(())
    }

    async fn initiate_upload(&self, repository: &str, upload_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.repositories.entry(repository.to_string()).or_default();
        inner
            .uploads
            .entry(repository.to_string())
            .or_default()
            .insert(upload_id.to_string(), Vec::new());
        Ok(())
    }

    async fn append_to_upload(
        &self,
        repository: &str,
        upload_id: &str,
        data: &[u8],
    ) -> Result<u64> {
        let mut inner = self.write()?;
        let uploads = inner
            .uploads
            .get_mut(repository)
            .ok_or_else(|| GatewayError::NotFound(format!("upload: {}", upload_id)))?;
        let buffer = uploads
            .get_mut(upload_id)
            .ok_or_else(|| GatewayError::NotFound(format!("upload: {}", upload_id)))?;
        buffer.extend_from_slice(data);
        Ok(buffer.len() as u64)
    }

    async fn upload_offset(&self, repository: &str, upload_id: &str) -> Result<u64> {
        let inner = self.read()?;
        let buffer = inner
            .uploads
            .get(repository)
            .and_then(|uploads| uploads.get(upload_id))
            .ok_or_else(|| GatewayError::NotFound(format!("upload: {}", upload_id)))?;
        Ok(buffer.len() as u64)
    }

    async fn complete_upload(
        &self,
        repository: &str,
        upload_id: &str,
        digest: &str,
        trailing: &[u8],
    ) -> Result<()> {
        let mut inner = self.write()?;
        let accumulated = inner
            .uploads
            .get(repository)
            .and_then(|uploads| uploads.get(upload_id))
            .ok_or_else(|| GatewayError::NotFound(format!("upload: {}", upload_id)))?;

        let mut data = accumulated.clone();
        data.extend_from_slice(trailing);
        // Mismatch leaves the session intact so the client may retry.
        verify_digest(digest, &data)?;

        inner
            .repositories
            .entry(repository.to_string())
            .or_default()
            .blobs
            .insert(digest.to_string(), data);
        if let Some(uploads) = inner.uploads.get_mut(repository) {
            uploads.remove(upload_id);
        }
        Ok(())
    }

    async fn cancel_upload(&self, repository: &str, upload_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        let uploads = inner
            .uploads
            .get_mut(repository)
            .ok_or_else(|| GatewayError::NotFound(format!("upload: {}", upload_id)))?;
        uploads
            .remove(upload_id)
            .ok_or_else(|| GatewayError::NotFound(format!("upload: {}", upload_id)))?;
        Ok(())
    }
}
