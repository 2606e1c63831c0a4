//! # Identity Rotation
//!
//! Best-effort hook called before Identify and before publication. Failures
//! are logged and never escalated.

use async_trait::async_trait;

#[async_trait]
pub trait IdentityRotator: Send + Sync {
    async fn rotate(&self) -> anyhow::Result<()>;
}

/// Keeps the current network identity
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRotator;

#[async_trait]
impl IdentityRotator for NoopRotator {
    async fn rotate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Rotate, logging instead of failing
pub async fn rotate_best_effort(rotator: &dyn IdentityRotator, before: &str) {
    if let Err(e) = rotator.rotate().await {
        tracing::warn!(before, error = %e, "Identity rotation failed, continuing");
    }
}
