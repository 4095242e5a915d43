use crate::error::Result;
use async_trait::async_trait;

/// Lifecycle shared by every statically registered station component.
///
/// Components are wired at startup by the application and driven in
/// registration order; `close` runs in reverse order.
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable name used for state tracking and logs
    fn name(&self) -> &str;

    /// Subscribe to the bus and spawn background activities
    async fn start(&self) -> Result<()>;

    /// Periodic liveness hook. Must not change component state.
    async fn housekeep(&self) -> Result<()> {
        Ok(())
    }

    /// Stop background activities and release owned resources
    async fn close(&self) -> Result<()>;
}
