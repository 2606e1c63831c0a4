//! # Publication
//!
//! Stores synthesized payloads under a content address and hands back a
//! reference. Only the local content-addressed store ships here.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::PublicationError;

/// Reference to a published payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationRef(pub String);

impl fmt::Display for PublicationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<PublicationRef, PublicationError>;
}

/// Lowercase hex SHA-256 of `bytes`
pub fn content_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Writes each payload to `<dir>/<sha256>`; publishing the same bytes twice is a no-op
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    dir: PathBuf,
}

impl LocalPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<PublicationRef, PublicationError> {
        if payload.is_empty() {
            return Err(PublicationError::Rejected("empty payload".to_string()));
        }
        let digest = content_digest(payload);
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(&digest);
        if tokio::fs::metadata(&path).await.is_err() {
            // readers only ever see complete files under the digest name
            let staging = self.dir.join(format!(".{}.{}.tmp", digest, Uuid::new_v4()));
            tokio::fs::write(&staging, payload).await?;
            if let Err(e) = tokio::fs::rename(&staging, &path).await {
                if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                    tracing::warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging file");
                }
                return Err(e.into());
            }
        }
        tracing::info!(path = %path.display(), "Payload published");
        Ok(PublicationRef(format!("sha256:{}", digest)))
    }
}
