use super::{is_digest, BlobReader, ContentStore};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;

/// Filesystem-backed content store.
///
/// Layout under the root directory:
/// `repositories/<name>/tags/<tag>`, `repositories/<name>/_manifests/<digest>`,
/// `repositories/<name>/_blobs/<digest>` and `uploads/<repo>/<uploadID>`.
/// Repository names may contain slashes and map to nested directories.
/// In-progress uploads are plain files keyed by upload id, so partial
/// state survives a restart.
pub struct FileContentStore {
    root: PathBuf,
    // Serializes mutations; upload appends in particular must observe
    // strictly monotonic offsets.
    lock: RwLock<()>,
}

fn io_not_found(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}

impl FileContentStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.join("repositories"), root.join("uploads")] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                GatewayError::Storage(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(FileContentStore {
            root,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo_path(&self, repository: &str) -> PathBuf {
        self.root.join("repositories").join(repository)
    }

    fn tag_path(&self, repository: &str, tag: &str) -> PathBuf {
        self.repo_path(repository).join("tags").join(tag)
    }

    fn manifest_path(&self, repository: &str, digest: &str) -> PathBuf {
        self.repo_path(repository).join("_manifests").join(digest)
    }

    fn blob_path(&self, repository: &str, digest: &str) -> PathBuf {
        self.repo_path(repository).join("_blobs").join(digest)
    }

    fn upload_path(&self, repository: &str, upload_id: &str) -> PathBuf {
        self.root.join("uploads").join(repository).join(upload_id)
    }

    /// A directory is a live repository when any sub-collection has entries.
    fn dir_has_entries(path: &Path) -> bool {
        std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    fn collect_repositories(base: &Path, prefix: &str, found: &mut Vec<String>) {
        let entries = match std::fs::read_dir(base) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if matches!(name.as_str(), "tags" | "_manifests" | "_blobs") {
                continue;
            }
            let qualified = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            let live = ["tags", "_manifests", "_blobs"]
                .iter()
                .any(|sub| Self::dir_has_entries(&path.join(sub)));
            if live {
                found.push(qualified.clone());
            }
            Self::collect_repositories(&path, &qualified, found);
        }
    }

    async fn read_tag(&self, repository: &str, tag: &str) -> Result<String> {
        let path = self.tag_path(repository, tag);
        let data = fs::read_to_string(&path).await.map_err(|e| {
            if io_not_found(&e) {
                GatewayError::NotFound(format!("tag: {}", tag))
            } else {
                GatewayError::Storage(format!("failed to read tag {}: {}", tag, e))
            }
        })?;
        Ok(data.trim().to_string())
    }

    /// sha256 of a file, streamed in chunks.
    async fn hash_file(path: &Path) -> Result<String> {
        let mut file = fs::File::open(path).await.map_err(|e| {
            GatewayError::Storage(format!("failed to open {}: {}", path.display(), e))
        })?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 8192];
        loop {
            let n = file.read(&mut buffer).await.map_err(|e| {
                GatewayError::Storage(format!("failed to read {}: {}", path.display(), e))
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(format!("sha256:{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn list_repositories(&self) -> Result<Vec<String>> {
        let _guard = self.lock.read().await;
        let mut repos = Vec::new();
        Self::collect_repositories(&self.root.join("repositories"), "", &mut repos);
        repos.sort();
        Ok(repos)
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let _guard = self.lock.read().await;
        let tags_dir = self.repo_path(repository).join("tags");
        let entries = match std::fs::read_dir(&tags_dir) {
            Ok(entries) => entries,
            Err(e) if io_not_found(&e) => return Ok(Vec::new()),
            Err(e) => {
                return Err(GatewayError::Storage(format!(
                    "failed to read tags of {}: {}",
                    repository, e
                )))
            }
        };
        let mut tags: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
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
        let _guard = self.lock.write().await;

        let manifest_path = self.manifest_path(repository, digest);
        if let Some(parent) = manifest_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                GatewayError::Storage(format!("failed to create manifest dir: {}", e))
            })?;
        }

        // Write through a temp file so a concurrent reader never observes
        // a half-written manifest.
        let temp_path = manifest_path.with_extension("tmp");
        fs::write(&temp_path, manifest).await.map_err(|e| {
            GatewayError::Storage(format!("failed to write manifest {}: {}", digest, e))
        })?;
        fs::rename(&temp_path, &manifest_path).await.map_err(|e| {
            GatewayError::Storage(format!("failed to rename manifest {}: {}", digest, e))
        })?;

        if !reference.is_empty() && !is_digest(reference) {
            let tag_path = self.tag_path(repository, reference);
            if let Some(parent) = tag_path.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    GatewayError::Storage(format!("failed to create tags dir: {}", e))
                })?;
            }
            fs::write(&tag_path, digest).await.map_err(|e| {
                GatewayError::Storage(format!("failed to write tag {}: {}", reference, e))
            })?;
        }

        Ok(())
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<(Vec<u8>, String)> {
        if is_digest(reference) {
            return self.get_manifest_by_digest(repository, reference).await;
        }
        let digest = {
            let _guard = self.lock.read().await;
            self.read_tag(repository, reference).await?
        };
        self.get_manifest_by_digest(repository, &digest).await
    }

    async fn get_manifest_by_digest(
        &self,
        repository: &str,
        digest: &str,
    ) -> Result<(Vec<u8>, String)> {
        let _guard = self.lock.read().await;
        let path = self.manifest_path(repository, digest);
        let data = fs::read(&path).await.map_err(|e| {
            if io_not_found(&e) {
                GatewayError::NotFound(format!("manifest: {}", digest))
            } else {
                GatewayError::Storage(format!("failed to read manifest {}: {}", digest, e))
            }
        })?;
        Ok((data, digest.to_string()))
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        let _guard = self.lock.write().await;

        if is_digest(reference) {
            let path = self.manifest_path(repository, reference);
            return fs::remove_file(&path).await.map_err(|e| {
                if io_not_found(&e) {
                    GatewayError::NotFound(format!("manifest: {}", reference))
                } else {
                    GatewayError::Storage(format!("failed to remove manifest: {}", e))
                }
            });
        }

        let digest = self.read_tag(repository, reference).await?;
        fs::remove_file(self.tag_path(repository, reference))
            .await
            .map_err(|e| GatewayError::Storage(format!("failed to remove tag: {}", e)))?;

        // Keep the digest record while any surviving tag still points at it.
        let mut still_referenced = false;
        if let Ok(entries) = std::fs::read_dir(self.repo_path(repository).join("tags")) {
            for entry in entries.flatten() {
                if let Ok(existing) = std::fs::read_to_string(entry.path()) {
                    if existing.trim() == digest {
                        still_referenced = true;
                        break;
                    }
                }
            }
        }
        if !still_referenced {
            match fs::remove_file(self.manifest_path(repository, &digest)).await {
                Ok(()) => {}
                Err(e) if io_not_found(&e) => {}
                Err(e) => {
                    return Err(GatewayError::Storage(format!(
                        "failed to remove manifest {}: {}",
                        digest, e
                    )))
                }
            }
        }
        Ok(())
    }

    async fn get_blob(&self, repository: &str, digest: &str) -> Result<(BlobReader, u64)> {
        let _guard = self.lock.read().await;
        let path = self.blob_path(repository, digest);
        let file = fs::File::open(&path).await.map_err(|e| {
            if io_not_found(&e) {
                GatewayError::NotFound(format!("blob: {}", digest))
            } else {
                GatewayError::Storage(format!("failed to open blob {}: {}", digest, e))
            }
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| GatewayError::Storage(format!("failed to stat blob {}: {}", digest, e)))?
            .len();
        Ok((Box::new(file), size))
    }

    async fn get_blob_size(&self, repository: &str, digest: &str) -> Result<u64> {
        let _guard = self.lock.read().await;
        let path = self.blob_path(repository, digest);
        let metadata = fs::metadata(&path).await.map_err(|e| {
            if io_not_found(&e) {
                GatewayError::NotFound(format!("blob: {}", digest))
            } else {
                GatewayError::Storage(format!("failed to stat blob {}: {}", digest, e))
            }
        })?;
        Ok(metadata.len())
    }

    async fn delete_blob(&self, repository: &str, digest: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        fs::remove_file(self.blob_path(repository, digest))
            .await
            .map_err(|e| {
                if io_not_found(&e) {
                    GatewayError::NotFound(format!("blob: {}", digest))
                } else {
                    GatewayError::Storage(format!("failed to remove blob {}: {}", digest, e))
                }
            })
    }

    async fn initiate_upload(&self, repository: &str, upload_id: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let path = self.upload_path(repository, upload_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::Storage(format!("failed to create uploads dir: {}", e)))?;
        }
        fs::File::create(&path)
            .await
            .map_err(|e| GatewayError::Storage(format!("failed to create upload file: {}", e)))?;
        Ok(())
    }

    async fn append_to_upload(
        &self,
        repository: &str,
        upload_id: &str,
        data: &[u8],
    ) -> Result<u64> {
        let _guard = self.lock.write().await;
        let path = self.upload_path(repository, upload_id);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                if io_not_found(&e) {
                    GatewayError::NotFound(format!("upload: {}", upload_id))
                } else {
                    GatewayError::Storage(format!("failed to open upload file: {}", e))
                }
            })?;
        file.write_all(data)
            .await
            .map_err(|e| GatewayError::Storage(format!("failed to write upload: {}", e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| GatewayError::Storage(format!("failed to stat upload: {}", e)))?
            .len();
        Ok(size)
    }

    async fn upload_offset(&self, repository: &str, upload_id: &str) -> Result<u64> {
        let _guard = self.lock.read().await;
        let metadata = fs::metadata(self.upload_path(repository, upload_id))
            .await
            .map_err(|e| {
                if io_not_found(&e) {
                    GatewayError::NotFound(format!("upload: {}", upload_id))
                } else {
                    GatewayError::Storage(format!("failed to stat upload: {}", e))
                }
            })?;
        Ok(metadata.len())
    }

    async fn complete_upload(
        &self,
        repository: &str,
        upload_id: &str,
        digest: &str,
        trailing: &[u8],
    ) -> Result<()> {
        let _guard = self.lock.write().await;
        let upload_path = self.upload_path(repository, upload_id);
        if !upload_path.exists() {
            return Err(GatewayError::NotFound(format!("upload: {}", upload_id)));
        }

        if !trailing.is_empty() {
            let mut file = fs::OpenOptions::new()
                .append(true)
                .open(&upload_path)
                .await
                .map_err(|e| GatewayError::Storage(format!("failed to open upload file: {}", e)))?;
            file.write_all(trailing)
                .await
                .map_err(|e| GatewayError::Storage(format!("failed to write upload: {}", e)))?;
            file.sync_all()
                .await
                .map_err(|e| GatewayError::Storage(format!("failed to sync upload: {}", e)))?;
        }

        // Mismatch keeps the session on disk so the client may retry.
        let computed = Self::hash_file(&upload_path).await?;
        if computed != digest {
            return Err(GatewayError::DigestMismatch {
                expected: digest.to_string(),
                computed,
            });
        }

        let blob_path = self.blob_path(repository, digest);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::Storage(format!("failed to create blobs dir: {}", e)))?;
        }

        // Promote via rename; fall back to copy+delete across filesystems.
        if let Err(rename_err) = fs::rename(&upload_path, &blob_path).await {
            fs::copy(&upload_path, &blob_path).await.map_err(|e| {
                GatewayError::Storage(format!(
                    "failed to promote upload (rename: {}, copy: {})",
                    rename_err, e
                ))
            })?;
            fs::remove_file(&upload_path)
                .await
                .map_err(|e| GatewayError::Storage(format!("failed to remove upload file: {}", e)))?;
        }

        Ok(())
    }

    async fn cancel_upload(&self, repository: &str, upload_id: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        fs::remove_file(self.upload_path(repository, upload_id))
            .await
            .map_err(|e| {
                if io_not_found(&e) {
                    GatewayError::NotFound(format!("upload: {}", upload_id))
                } else {
                    GatewayError::Storage(format!("failed to remove upload file: {}", e))
                }
            })
    }
}
