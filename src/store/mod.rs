//! Content-addressed storage for the local registry: manifests, tags,
//! blobs and resumable upload sessions.

mod file;
mod memory;

pub use file::FileContentStore;
pub use memory::MemoryContentStore;

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncRead;

/// Read side of a stored blob, scoped to one request.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Compute the content address of a byte sequence.
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{:x}", hasher.finalize())
}

/// Whether a manifest reference is in digest form rather than a tag.
pub fn is_digest(reference: &str) -> bool {
    match reference.strip_prefix("sha256:") {
        Some(hex) => hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Storage backing the local V2 registry.
///
/// Implemented by the in-memory and filesystem variants; handlers hold an
/// `Arc<dyn ContentStore>`. Bytes are stored verbatim: the bytes a digest
/// was computed over are the bytes returned on read.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<String>>;

    /// Tags of a repository. Unknown repositories yield an empty list,
    /// not an error.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Store manifest bytes under `digest`; a non-digest `reference` is
    /// additionally recorded as a tag pointing at `digest`.
    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        digest: &str,
        manifest: &[u8],
    ) -> Result<()>;

    /// Resolve a tag or digest reference to manifest bytes and digest.
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<(Vec<u8>, String)>;

    async fn get_manifest_by_digest(
        &self,
        repository: &str,
        digest: &str,
    ) -> Result<(Vec<u8>, String)>;

    /// Digest form removes the digest record only. Tag form removes the
    /// tag, and the digest record too unless another tag still references
    /// the same digest.
    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()>;

    async fn get_blob(&self, repository: &str, digest: &str) -> Result<(BlobReader, u64)>;

    async fn get_blob_size(&self, repository: &str, digest: &str) -> Result<u64>;

    async fn delete_blob(&self, repository: &str, digest: &str) -> Result<()>;

    async fn initiate_upload(&self, repository: &str, upload_id: &str) -> Result<()>;

    /// Append a chunk, returning the new total offset.
    async fn append_to_upload(&self, repository: &str, upload_id: &str, data: &[u8])
        -> Result<u64>;

    /// Current offset of an in-progress upload.
    async fn upload_offset(&self, repository: &str, upload_id: &str) -> Result<u64>;

    /// Verify that sha256(accumulated + trailing) equals `digest` and
    /// promote the bytes to a blob, removing the session. A mismatch
    /// leaves the session in place and no blob is created.
    async fn complete_upload(
        &self,
        repository: &str,
        upload_id: &str,
        digest: &str,
        trailing: &[u8],
    ) -> Result<()>;

    /// Abort and remove an upload session.
    async fn cancel_upload(&self, repository: &str, upload_id: &str) -> Result<()>;
}

pub(crate) fn verify_digest(expected: &str, data: &[u8]) -> Result<()> {
    let computed = compute_digest(data);
    if computed != expected {
        return Err(GatewayError::DigestMismatch {
            expected: expected.to_string(),
            computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_form_detection() {
        assert!(is_digest(
            "sha256:936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af"
        ));
        assert!(!is_digest("latest"));
        assert!(!is_digest("sha256:short"));
        assert!(!is_digest(
            "sha256:zzza185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af"
        ));
    }

    #[test]
    fn digest_of_known_bytes() {
        assert_eq!(
            compute_digest(b"helloworld"),
            "sha256:936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af"
        );
    }
}
