use async_trait::async_trait;
use bridge_protocol::UnifiedState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A southbound source of telemetry. After `start` returns success the
/// adapter is the sole producer of states tagged with its `name`; it
/// writes to `out` and unwinds cleanly when `cancellation` fires.
///
/// `stop` must be idempotent and return only once no further writes
/// will occur. A failed `start` must leave no resources acquired.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    async fn start(
        &self,
        cancellation: CancellationToken,
        out: mpsc::Sender<UnifiedState>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn stop(&self);
}

/// Sends `state` to the engine's event channel without blocking,
/// dropping it (and logging a warning) when the channel is full.
pub fn emit_non_blocking(out: &mpsc::Sender<UnifiedState>, state: UnifiedState, adapter_name: &str) {
    if let Err(err) = out.try_send(state) {
        tracing::warn!(adapter = adapter_name, "dropping sample: event channel full or closed: {err}");
    }
}
