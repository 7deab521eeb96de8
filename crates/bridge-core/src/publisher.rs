use async_trait::async_trait;
use bridge_protocol::UnifiedState;
use tokio_util::sync::CancellationToken;

/// A northbound consumer of the engine's fan-out. `publish` must be
/// non-blocking from the engine's perspective — bounded wait of
/// roughly O(10ms), or background-dispatched. Errors are returned but
/// must never stall the engine's event loop.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, cancellation: CancellationToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn publish(&self, state: &UnifiedState) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn stop(&self);
}
