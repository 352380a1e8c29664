//! Content-addressed storage for prepared report images.
//!
//! References look like `sha256:<64 hex chars>`. Writing the same reference
//! twice is a no-op, so two reports with the same photo share one file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::store::StoreError;

const REFERENCE_PREFIX: &str = "sha256:";

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put(&self, reference: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn get(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Hex digest of a well-formed reference, `None` for anything else.
/// Keeps caller-supplied references from escaping the image directory.
pub fn digest_of(reference: &str) -> Option<&str> {
    let digest = reference.strip_prefix(REFERENCE_PREFIX)?;
    (digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())).then_some(digest)
}

fn malformed(reference: &str) -> StoreError {
    StoreError::Corrupt(format!("malformed image reference: {reference}"))
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryImageStore {
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn put(&self, reference: &str, bytes: &[u8]) -> Result<(), StoreError> {
        digest_of(reference).ok_or_else(|| malformed(reference))?;
        self.images
            .lock()
            .map_err(|_| StoreError::Unavailable("image store lock poisoned".into()))?
            .entry(reference.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    async fn get(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .images
            .lock()
            .map_err(|_| StoreError::Unavailable("image store lock poisoned".into()))?
            .get(reference)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf, StoreError> {
        let digest = digest_of(reference).ok_or_else(|| malformed(reference))?;
        Ok(self.root.join(format!("{digest}.png")))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn put(&self, reference: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(reference)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("image dir: {e}")))?;

        // Write-then-rename so readers never observe a partial file.
        let tmp = path.with_extension(format!("png.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::Unavailable(format!("image write: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("image rename: {e}")))?;
        Ok(())
    }

    async fn get(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("image read: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: &str = "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn digest_rejects_path_tricks() {
        assert!(digest_of(REF).is_some());
        assert!(digest_of("sha256:../../etc/passwd").is_none());
        assert!(digest_of("md5:abcd").is_none());
        assert!(digest_of("sha256:abc").is_none());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryImageStore::new();
        store.put(REF, b"png-bytes").await.unwrap();
        store.put(REF, b"other").await.unwrap();
        assert_eq!(store.get(REF).await.unwrap(), Some(b"png-bytes".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn fs_store_writes_and_reads() {
        let dir = std::env::temp_dir().join(format!("townsense-images-{}", uuid::Uuid::new_v4()));
        let store = FsImageStore::new(&dir);

        assert_eq!(store.get(REF).await.unwrap(), None);
        store.put(REF, b"png-bytes").await.unwrap();
        assert_eq!(store.get(REF).await.unwrap(), Some(b"png-bytes".to_vec()));
        assert!(store.put("sha256:nope", b"x").await.is_err());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
