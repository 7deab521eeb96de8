//! The broadcast publisher: a WebSocket push channel for the browser UI.
//!
//! Each subscriber connects with an optional path component naming a
//! `device_id` (`ws://host:port/d1`); an empty or `all` path subscribes to
//! every device. Every state handed to `publish` is serialized once, then
//! handed to each matching subscriber's bounded queue without blocking —
//! a full queue drops the sample for that subscriber and bumps its drop
//! counter, never the publish call itself.
//!
//! Grounded on `AppState::get_or_create_broadcast` and its subscriber
//! registry (`services/server/src/state.rs`), generalized from a single
//! `Uuid` stream id to a `device_id` filter.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bridge_core::Publisher;
use bridge_protocol::UnifiedState;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub bind_addr: String,
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig { bind_addr: "0.0.0.0:7900".to_string(), subscriber_queue_capacity: 64 }
    }
}

struct Subscriber {
    device_filter: Option<String>,
    tx: mpsc::Sender<Arc<str>>,
    dropped: Arc<AtomicU64>,
}

/// Fans every admitted state out to WebSocket subscribers. One accept
/// task runs the listener; one pump task runs per live subscriber.
pub struct BroadcastPublisher {
    name: String,
    config: BroadcastConfig,
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_id: Arc<AtomicU64>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    pump_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl BroadcastPublisher {
    pub fn new(name: impl Into<String>, config: BroadcastConfig) -> Self {
        BroadcastPublisher {
            name: name.into(),
            config,
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            accept_handle: Mutex::new(None),
            pump_handles: Arc::new(Mutex::new(Vec::new())),
            bound_addr: Mutex::new(None),
        }
    }

    /// The socket address actually bound by `start`, once it has run.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }

    /// Number of samples dropped across all subscribers because their
    /// queue was full, summed at call time.
    pub fn total_dropped(&self) -> u64 {
        self.subscribers.iter().map(|entry| entry.value().dropped.load(Ordering::Relaxed)).sum()
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, cancellation: CancellationToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let bound = listener.local_addr()?;
        *self.bound_addr.lock() = Some(bound);
        tracing::info!(publisher = %self.name, addr = %bound, "broadcast publisher listening");

        let subscribers = self.subscribers.clone();
        let next_id = self.next_id.clone();
        let pump_handles = self.pump_handles.clone();
        let queue_capacity = self.config.subscriber_queue_capacity;
        let name = self.name.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        tracing::debug!(publisher = %name, "broadcast accept loop cancelled");
                        break;
                    }
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                tracing::warn!(publisher = %name, "accept error: {err}");
                                continue;
                            }
                        };
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = mpsc::channel(queue_capacity);
                        let sub_subscribers = subscribers.clone();
                        let sub_name = name.clone();
                        let pump = tokio::spawn(handle_subscriber(stream, peer, id, tx, rx, sub_subscribers, sub_name));
                        pump_handles.lock().push(pump);
                    }
                }
            }
        });

        *self.accept_handle.lock() = Some(handle);
        Ok(())
    }

    async fn publish(&self, state: &UnifiedState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload: Arc<str> = Arc::from(serde_json::to_string(state)?.into_boxed_str());
        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if let Some(filter) = &sub.device_filter {
                if filter != &state.device_id {
                    continue;
                }
            }
            if sub.tx.try_send(payload.clone()).is_err() {
                let dropped = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(publisher = %self.name, subscriber = entry.key(), dropped, "subscriber queue full, dropping sample");
            }
        }
        Ok(())
    }

    async fn stop(&self) {
        if let Some(handle) = self.accept_handle.lock().take() {
            let _ = handle.await;
        }
        // Dropping every registry entry drops the only live `tx` clone for
        // each subscriber; each pump task's `rx.recv()` then returns `None`
        // and the task unwinds on its own.
        self.subscribers.clear();
        let handles: Vec<_> = std::mem::take(&mut *self.pump_handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn handle_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    tx: mpsc::Sender<Arc<str>>,
    rx: mpsc::Receiver<Arc<str>>,
    subscribers: Arc<DashMap<u64, Subscriber>>,
    name: String,
) {
    let device_filter: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let filter_slot = device_filter.clone();
    let callback = move |req: &Request, resp: Response| {
        let path = req.uri().path().trim_start_matches('/');
        if !path.is_empty() && path != "all" {
            *filter_slot.lock() = Some(path.to_string());
        }
        Ok(resp)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            tracing::warn!(publisher = %name, %peer, "websocket handshake failed: {err}");
            return;
        }
    };
    let device_filter = device_filter.lock().clone();

    tracing::info!(publisher = %name, %peer, subscriber = id, filter = ?device_filter, "subscriber connected");
    subscribers.insert(id, Subscriber { device_filter, tx, dropped: Arc::new(AtomicU64::new(0)) });

    run_subscriber(id, ws, rx, &name).await;
    subscribers.remove(&id);
}

async fn run_subscriber(id: u64, mut ws: WebSocketStream<TcpStream>, mut rx: mpsc::Receiver<Arc<str>>, name: &str) {
    loop {
        tokio::select! {
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::debug!(publisher = %name, subscriber = id, "subscriber socket error: {err}");
                        break;
                    }
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(payload) => {
                        if ws.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    let _ = ws.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::{Attitude, FlightMode, Location, Status, Velocity};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    fn sample_state(device_id: &str) -> UnifiedState {
        UnifiedState {
            device_id: device_id.to_string(),
            timestamp: 1_700_000_000_000,
            protocol_source: "framed-session".to_string(),
            location: Location {
                lat: 39.9,
                lon: 116.4,
                alt_baro: 90.0,
                alt_gnss: 100.0,
                coordinate_system: "WGS84".to_string(),
                lat_gcj02: None,
                lon_gcj02: None,
                lat_bd09: None,
                lon_bd09: None,
            },
            attitude: Attitude::default(),
            velocity: Velocity::default(),
            status: Status { battery_percent: 80.0, flight_mode: FlightMode::Guided, armed: true, signal_quality: 70.0 },
        }
    }

    async fn spawn_publisher(config: BroadcastConfig) -> (BroadcastPublisher, CancellationToken) {
        let publisher = BroadcastPublisher::new("broadcast", config);
        let cancellation = CancellationToken::new();
        publisher.start(cancellation.clone()).await.unwrap();
        (publisher, cancellation)
    }

    #[tokio::test]
    async fn all_subscriber_receives_every_device() {
        let config = BroadcastConfig { bind_addr: "127.0.0.1:0".to_string(), subscriber_queue_capacity: 8 };
        let (publisher, cancellation) = spawn_publisher(config).await;
        let addr = publisher.local_addr().unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/all")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        publisher.publish(&sample_state("d1")).await.unwrap();
        publisher.publish(&sample_state("d2")).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), ws.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(first, Message::Text(ref t) if t.contains("\"d1\"")));
        let second = tokio::time::timeout(Duration::from_secs(1), ws.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(second, Message::Text(ref t) if t.contains("\"d2\"")));

        cancellation.cancel();
        publisher.stop().await;
    }

    #[tokio::test]
    async fn device_filtered_subscriber_only_receives_its_device() {
        let config = BroadcastConfig { bind_addr: "127.0.0.1:0".to_string(), subscriber_queue_capacity: 8 };
        let (publisher, cancellation) = spawn_publisher(config).await;
        let addr = publisher.local_addr().unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/d1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        publisher.publish(&sample_state("d2")).await.unwrap();
        publisher.publish(&sample_state("d1")).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), ws.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(received, Message::Text(ref t) if t.contains("\"d1\"")));

        cancellation.cancel();
        publisher.stop().await;
    }

    #[tokio::test]
    async fn full_subscriber_queue_drops_and_counts_instead_of_blocking() {
        let config = BroadcastConfig { bind_addr: "127.0.0.1:0".to_string(), subscriber_queue_capacity: 1 };
        let (publisher, cancellation) = spawn_publisher(config).await;
        let addr = publisher.local_addr().unwrap();

        let (_ws, _) = connect_async(format!("ws://{addr}/all")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        for i in 0..5 {
            publisher.publish(&sample_state(&format!("d{i}"))).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(publisher.total_dropped() > 0);

        cancellation.cancel();
        publisher.stop().await;
    }

    #[tokio::test]
    async fn subscriber_is_deregistered_on_disconnect() {
        let config = BroadcastConfig { bind_addr: "127.0.0.1:0".to_string(), subscriber_queue_capacity: 8 };
        let (publisher, cancellation) = spawn_publisher(config).await;
        let addr = publisher.local_addr().unwrap();

        let (ws, _) = connect_async(format!("ws://{addr}/all")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(publisher.subscribers.len(), 1);

        drop(ws);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(publisher.subscribers.len(), 0);

        cancellation.cancel();
        publisher.stop().await;
    }
}
