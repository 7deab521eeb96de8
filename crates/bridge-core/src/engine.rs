use std::sync::Arc;

use bridge_log::LogBuffer;
use bridge_protocol::{LogLevel, UnifiedState};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapter;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::publisher::Publisher;
use crate::rate_limiter::RateLimiter;
use crate::state_store::StateStore;
use crate::throttle::Throttler;
use crate::track_store::TrackStore;

type StateCallback = dyn Fn(&UnifiedState) + Send + Sync;

/// Orchestrator: owns the supporting stores, the event channel, and the
/// start/stop lifecycle of every registered adapter and publisher.
pub struct RoutingEngine {
    config: EngineConfig,
    pub state_store: Arc<StateStore>,
    pub track_store: Arc<TrackStore>,
    pub throttler: Arc<Throttler>,
    pub log_buffer: Arc<LogBuffer>,
    pub rate_limiter: Arc<RateLimiter>,
    adapters: Vec<Arc<dyn Adapter>>,
    publishers: Vec<Arc<dyn Publisher>>,
    broadcast_callback: Arc<Mutex<Option<Arc<StateCallback>>>>,
    cancellation: CancellationToken,
    router_handle: Mutex<Option<JoinHandle<()>>>,
    event_tx_template: Mutex<Option<mpsc::Sender<UnifiedState>>>,
    event_rx: Mutex<Option<mpsc::Receiver<UnifiedState>>>,
}

impl RoutingEngine {
    /// Publishers and adapters are supplied up front; the engine treats
    /// the registered set as append-only for its lifetime (no runtime
    /// deregistration, per design).
    pub fn new(
        config: EngineConfig,
        adapters: Vec<Arc<dyn Adapter>>,
        publishers: Vec<Arc<dyn Publisher>>,
        rate_limiter_rate: u32,
        rate_limiter_burst: u32,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        RoutingEngine {
            state_store: Arc::new(StateStore::new()),
            track_store: Arc::new(TrackStore::new(config.track_max_points, config.track_sample_interval_ms)),
            throttler: Arc::new(Throttler::new(config.rate_hz)),
            log_buffer: Arc::new(LogBuffer::new(config.log_buffer_capacity)),
            rate_limiter: Arc::new(RateLimiter::new(rate_limiter_rate, rate_limiter_burst)),
            adapters,
            publishers,
            broadcast_callback: Arc::new(Mutex::new(None)),
            cancellation: CancellationToken::new(),
            router_handle: Mutex::new(None),
            event_tx_template: Mutex::new(Some(tx)),
            event_rx: Mutex::new(Some(rx)),
            config,
        }
    }

    /// A sender clone adapters should use to emit states onto the
    /// engine's event channel.
    pub fn event_sender(&self) -> mpsc::Sender<UnifiedState> {
        self.event_tx_template.lock().as_ref().expect("engine not yet stopped").clone()
    }

    /// Single mutable slot invoked post-throttle for every admitted
    /// state; replaced wholesale on re-set (used by the WebSocket
    /// broadcaster).
    pub fn set_state_callback(&self, callback: impl Fn(&UnifiedState) + Send + Sync + 'static) {
        *self.broadcast_callback.lock() = Some(Arc::new(callback));
    }

    /// Publishers first (so no samples are lost to not-yet-started
    /// sinks), then adapters, then the router task.
    pub async fn start(&self) -> Result<(), EngineError> {
        for publisher in &self.publishers {
            publisher.start(self.cancellation.clone()).await.map_err(|source| {
                EngineError::PublisherStartFailed { name: publisher.name().to_string(), source }
            })?;
        }
        let tx = self.event_sender();
        for adapter in &self.adapters {
            adapter
                .start(self.cancellation.clone(), tx.clone())
                .await
                .map_err(|source| EngineError::AdapterStartFailed { name: adapter.name().to_string(), source })?;
        }

        let rx = self.event_rx.lock().take().expect("start called only once");
        let handle = tokio::spawn(run_router(
            rx,
            self.state_store.clone(),
            self.track_store.clone(),
            self.throttler.clone(),
            self.log_buffer.clone(),
            self.publishers.clone(),
            self.broadcast_callback.clone(),
            self.config.convert_gcj02,
            self.config.convert_bd09,
            self.config.track_enabled,
        ));
        *self.router_handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop adapters (stops producers), drain the router (channel close
    /// causes it to exit), then stop publishers in registration order.
    pub async fn stop(&self) {
        self.cancellation.cancel();
        for adapter in &self.adapters {
            adapter.stop().await;
            tracing::info!(adapter = adapter.name(), "adapter stopped");
        }
        // Drop the engine's own sender so the channel closes once every
        // adapter-held clone is gone too, letting the router drain and exit.
        self.event_tx_template.lock().take();
        if let Some(handle) = self.router_handle.lock().take() {
            let _ = handle.await;
        }
        for publisher in &self.publishers {
            publisher.stop().await;
            tracing::info!(publisher = publisher.name(), "publisher stopped");
        }
    }

    pub fn get_state(&self, device_id: &str) -> Option<UnifiedState> {
        self.state_store.get(device_id)
    }

    pub fn get_all_states(&self) -> Vec<UnifiedState> {
        self.state_store.get_all()
    }

    pub fn get_device_count(&self) -> usize {
        self.state_store.count()
    }

    pub fn get_track(&self, device_id: &str, limit: usize, since_ms: i64) -> Vec<bridge_protocol::TrackPoint> {
        if since_ms > 0 {
            self.track_store.get_since(device_id, since_ms)
        } else {
            self.track_store.get_last(device_id, limit)
        }
    }

    pub fn clear_track(&self, device_id: &str) {
        self.track_store.clear(device_id);
    }

    pub fn get_track_size(&self, device_id: &str) -> usize {
        self.track_store.size(device_id)
    }

    pub fn is_track_enabled(&self) -> bool {
        self.config.track_enabled
    }

    pub fn get_adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn get_publisher_names(&self) -> Vec<String> {
        self.publishers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn set_throttle_rate(&self, hz: f64) {
        self.throttler.set_rate(hz);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_router(
    mut rx: mpsc::Receiver<UnifiedState>,
    state_store: Arc<StateStore>,
    track_store: Arc<TrackStore>,
    throttler: Arc<Throttler>,
    log_buffer: Arc<LogBuffer>,
    publishers: Vec<Arc<dyn Publisher>>,
    broadcast_callback: Arc<Mutex<Option<Arc<StateCallback>>>>,
    convert_gcj02: bool,
    convert_bd09: bool,
    track_enabled: bool,
) {
    while let Some(mut state) = rx.recv().await {
        if let Err(reason) = validate(&state) {
            log_buffer.add(LogLevel::Warn, "routing-engine", format!("dropping invalid sample: {reason}"));
            continue;
        }

        let pos = bridge_geo::convert(state.location.lat, state.location.lon, convert_gcj02, convert_bd09);
        state.location.lat_gcj02 = pos.lat_gcj02;
        state.location.lon_gcj02 = pos.lon_gcj02;
        state.location.lat_bd09 = pos.lat_bd09;
        state.location.lon_bd09 = pos.lon_bd09;

        state_store.update(state.clone());

        let now = chrono::Utc::now().timestamp_millis();
        if track_enabled {
            track_store.record(&state, now);
        }

        if !throttler.should_publish(&state.device_id, now) {
            continue;
        }

        for publisher in &publishers {
            if let Err(err) = publisher.publish(&state).await {
                log_buffer.add(
                    LogLevel::Warn,
                    "routing-engine",
                    format!("publisher '{}' failed: {err}", publisher.name()),
                );
            }
        }

        let callback = broadcast_callback.lock().clone();
        if let Some(callback) = callback {
            callback(&state);
        }
    }
}

fn validate(state: &UnifiedState) -> Result<(), &'static str> {
    if state.device_id.is_empty() {
        return Err("missing device_id");
    }
    if !(0.0..=100.0).contains(&state.status.battery_percent) {
        return Err("battery_percent out of range");
    }
    if state.location.lat.is_nan() || state.location.lon.is_nan() {
        return Err("NaN coordinate");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bridge_protocol::{Attitude, Location, Status, Velocity};

    fn sample(device_id: &str, timestamp: i64) -> UnifiedState {
        UnifiedState {
            device_id: device_id.to_string(),
            timestamp,
            protocol_source: "test".into(),
            location: Location {
                lat: 22.0,
                lon: 114.0,
                alt_baro: 50.0,
                alt_gnss: 60.0,
                coordinate_system: "WGS84".to_string(),
                lat_gcj02: None,
                lon_gcj02: None,
                lat_bd09: None,
                lon_bd09: None,
            },
            attitude: Attitude::default(),
            velocity: Velocity::default(),
            status: Status { battery_percent: 80.0, flight_mode: Default::default(), armed: true, signal_quality: 90.0 },
        }
    }

    struct NoopAdapter {
        name: &'static str,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Adapter for NoopAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(
            &self,
            _cancellation: CancellationToken,
            _out: mpsc::Sender<UnifiedState>,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }

        async fn stop(&self) {
            self.order.lock().push(format!("adapter:{}", self.name));
        }
    }

    struct RecordingPublisher {
        name: &'static str,
        received: Arc<Mutex<Vec<UnifiedState>>>,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Publisher for RecordingPublisher {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self, _cancellation: CancellationToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }

        async fn publish(&self, state: &UnifiedState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.received.lock().push(state.clone());
            Ok(())
        }

        async fn stop(&self) {
            self.order.lock().push(format!("publisher:{}", self.name));
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            rate_hz: 1.0,
            convert_gcj02: false,
            convert_bd09: false,
            track_enabled: true,
            track_max_points: 100,
            track_sample_interval_ms: 0,
            event_channel_capacity: 16,
            log_buffer_capacity: 64,
        }
    }

    #[tokio::test]
    async fn throttle_admits_first_sample_and_drops_the_rest_of_a_burst() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let publisher = Arc::new(RecordingPublisher { name: "rec", received: received.clone(), order });
        let engine = RoutingEngine::new(test_config(), vec![], vec![publisher], 100, 100);
        engine.start().await.unwrap();

        let tx = engine.event_sender();
        for i in 0..5 {
            tx.send(sample("d1", i * 10)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(received.lock().len(), 1, "only the first sample in the burst should clear the 1Hz gate");
        assert_eq!(engine.get_device_count(), 1, "state store updates unconditionally, even when throttled");

        engine.stop().await;
    }

    #[tokio::test]
    async fn adapters_stop_before_publishers_on_shutdown() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let adapter = Arc::new(NoopAdapter { name: "south", order: order.clone() });
        let publisher =
            Arc::new(RecordingPublisher { name: "north", received: Arc::new(Mutex::new(Vec::new())), order: order.clone() });
        let engine = RoutingEngine::new(test_config(), vec![adapter], vec![publisher], 100, 100);
        engine.start().await.unwrap();

        engine.stop().await;

        let order = order.lock();
        assert_eq!(order.as_slice(), ["adapter:south", "publisher:north"]);
    }

    #[tokio::test]
    async fn invalid_samples_are_dropped_before_reaching_the_state_store() {
        let engine = RoutingEngine::new(test_config(), vec![], vec![], 100, 100);
        engine.start().await.unwrap();

        let tx = engine.event_sender();
        tx.send(sample("", 0)).await.unwrap();
        let mut bad = sample("d1", 0);
        bad.status.battery_percent = 200.0;
        tx.send(bad).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.get_device_count(), 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn broadcast_callback_fires_for_every_admitted_sample() {
        let count = Arc::new(AtomicUsize::new(0));
        let engine = RoutingEngine::new(test_config(), vec![], vec![], 100, 100);
        let count_clone = count.clone();
        engine.set_state_callback(move |_state| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        engine.start().await.unwrap();

        let tx = engine.event_sender();
        tx.send(sample("d1", 0)).await.unwrap();
        tx.send(sample("d2", 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        engine.stop().await;
    }

    #[tokio::test]
    async fn track_store_records_samples_when_enabled() {
        let engine = RoutingEngine::new(test_config(), vec![], vec![], 100, 100);
        engine.start().await.unwrap();

        let tx = engine.event_sender();
        tx.send(sample("d1", 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.get_track_size("d1"), 1);
        engine.stop().await;
    }
}
