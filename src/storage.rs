//! Artifact storage
//!
//! Blob storage for export artifacts is an external collaborator behind
//! the [`ArtifactStore`] trait. The filesystem implementation below is the
//! default for single-node deployments; an object store adapter implements
//! the same trait.

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist bytes, returning an opaque location token.
    async fn store(&self, name: &str, bytes: &[u8]) -> anyhow::Result<String>;

    /// Delete a previously stored artifact.
    async fn delete(&self, location: &str) -> anyhow::Result<()>;

    /// Time-limited download URL for a stored artifact.
    fn signed_url(&self, location: &str, ttl_seconds: u64) -> String;
}

/// Filesystem-backed artifact store with HMAC-style URL signing.
pub struct FsArtifactStore {
    root: PathBuf,
    secret: String,
    base_url: String,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, secret: String, base_url: String) -> Self {
        Self {
            root: root.into(),
            secret,
            base_url,
        }
    }

    fn path_for(&self, location: &str) -> anyhow::Result<PathBuf> {
        // Locations are service-generated, but refuse traversal anyway
        if location.contains("..") || Path::new(location).is_absolute() {
            anyhow::bail!("invalid artifact location: {location}");
        }
        Ok(self.root.join(location))
    }
}

/// Deterministic signature over (secret, location, expiry).
pub fn sign(secret: &str, location: &str, expires_epoch: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"|");
    hasher.update(location.as_bytes());
    hasher.update(b"|");
    hasher.update(expires_epoch.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, name: &str, bytes: &[u8]) -> anyhow::Result<String> {
        let location = format!("{}/{}", uuid::Uuid::new_v4().simple(), name);
        let path = self.path_for(&location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(location)
    }

    async fn delete(&self, location: &str) -> anyhow::Result<()> {
        let path = self.path_for(location)?;
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    fn signed_url(&self, location: &str, ttl_seconds: u64) -> String {
        let expires = Utc::now().timestamp() + ttl_seconds as i64;
        let sig = sign(&self.secret, location, expires);
        format!(
            "{}/artifacts/{}?expires={}&sig={}",
            self.base_url, location, expires, sig
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_and_keyed() {
        let a = sign("secret", "loc/file.jsonl", 1_700_000_000);
        let b = sign("secret", "loc/file.jsonl", 1_700_000_000);
        assert_eq!(a, b);
        assert_ne!(a, sign("other", "loc/file.jsonl", 1_700_000_000));
        assert_ne!(a, sign("secret", "loc/file.jsonl", 1_700_000_001));
    }

    #[tokio::test]
    async fn store_and_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(
            dir.path(),
            "secret".to_string(),
            "http://localhost:8080".to_string(),
        );

        let location = store.store("export.jsonl", b"line\n").await.unwrap();
        assert!(dir.path().join(&location).exists());

        store.delete(&location).await.unwrap();
        assert!(!dir.path().join(&location).exists());
    }

    #[tokio::test]
    async fn refuses_traversal_locations() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(
            dir.path(),
            "secret".to_string(),
            "http://localhost:8080".to_string(),
        );
        assert!(store.delete("../etc/passwd").await.is_err());
    }
}
