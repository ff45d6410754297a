//! Lifecycle trait for background components

use crate::error::BerthResult;
use async_trait::async_trait;

/// Start/stop interface shared by components that own a background task
#[async_trait]
pub trait LifecycleManager: Send + Sync {
    /// Spawn the background task; starting twice is a no-op
    async fn start(&mut self) -> BerthResult<()>;

    /// Stop the background task
    async fn stop(&mut self) -> BerthResult<()>;

    /// Restart the manager (stop then start)
    async fn restart(&mut self) -> BerthResult<()> {
        self.stop().await?;
        self.start().await
    }

    fn is_running(&self) -> bool;

    /// Get manager name for logging
    fn name(&self) -> &'static str;
}
