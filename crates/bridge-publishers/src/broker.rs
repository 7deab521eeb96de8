//! The broker publisher: connects to a pub/sub broker over a WebSocket
//! transport with auto-reconnect, publishes two topics per state
//! (`{prefix}/{device_id}/state` full JSON, `{prefix}/{device_id}/location`
//! trimmed), and carries last-will online/offline status at
//! `{lwt_topic}/{client_id}`.
//!
//! There is no MQTT broker anywhere in reach of this crate's dependency
//! graph, so the broker speaks a small JSON-over-WebSocket envelope
//! (`{"topic", "retain", "payload"}`) rather than real MQTT wire bytes —
//! illustrative, per the contract this implements.

use std::time::Duration;

use async_trait::async_trait;
use bridge_core::Publisher;
use bridge_protocol::UnifiedState;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub broker_url: String,
    pub topic_prefix: String,
    pub lwt_topic: String,
    pub client_id: String,
    pub publish_channel_capacity: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub ack_wait: Duration,
    pub shutdown_grace: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            broker_url: "ws://127.0.0.1:9001".to_string(),
            topic_prefix: "bridge".to_string(),
            lwt_topic: "bridge/status".to_string(),
            client_id: "bridge-gateway".to_string(),
            publish_channel_capacity: 256,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            ack_wait: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Serialize)]
struct BrokerFrame<'a> {
    topic: &'a str,
    retain: bool,
    payload: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct LocationPayload<'a> {
    device_id: &'a str,
    timestamp: i64,
    lat: f64,
    lon: f64,
    alt_gnss: f64,
}

impl<'a> From<&'a UnifiedState> for LocationPayload<'a> {
    fn from(state: &'a UnifiedState) -> Self {
        LocationPayload {
            device_id: &state.device_id,
            timestamp: state.timestamp,
            lat: state.location.lat,
            lon: state.location.lon,
            alt_gnss: state.location.alt_gnss,
        }
    }
}

enum Outbound {
    Publish { topic: String, retain: bool, payload: serde_json::Value },
    Shutdown,
}

#[derive(Debug)]
enum BrokerError {
    Connect(String),
    Ws(String),
    Serialization(String),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Connect(s) => write!(f, "broker connect error: {s}"),
            BrokerError::Ws(s) => write!(f, "broker transport error: {s}"),
            BrokerError::Serialization(s) => write!(f, "broker serialization error: {s}"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Publishes unified states to a broker, with auto-reconnect and
/// last-will online/offline status. Publishing is background-dispatched:
/// `publish` enqueues onto a bounded channel drained by the connection
/// worker, so a slow or down broker never stalls the engine.
pub struct BrokerPublisher {
    name: String,
    config: BrokerConfig,
    tx: Mutex<Option<mpsc::Sender<Outbound>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerPublisher {
    pub fn new(name: impl Into<String>, config: BrokerConfig) -> Self {
        BrokerPublisher { name: name.into(), config, tx: Mutex::new(None), worker: Mutex::new(None) }
    }
}

#[async_trait]
impl Publisher for BrokerPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, cancellation: CancellationToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (tx, rx) = mpsc::channel(self.config.publish_channel_capacity);
        let config = self.config.clone();
        let name = self.name.clone();
        let handle = tokio::spawn(run_worker(config, rx, cancellation, name));
        *self.tx.lock() = Some(tx);
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    async fn publish(&self, state: &UnifiedState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            return Err("broker publisher not started".into());
        };

        let state_topic = format!("{}/{}/state", self.config.topic_prefix, state.device_id);
        let location_topic = format!("{}/{}/location", self.config.topic_prefix, state.device_id);
        let state_payload = serde_json::to_value(state)?;
        let location_payload = serde_json::to_value(LocationPayload::from(state))?;

        if tx.try_send(Outbound::Publish { topic: state_topic, retain: false, payload: state_payload }).is_err() {
            tracing::warn!(publisher = %self.name, device_id = %state.device_id, "broker publish channel full, dropping state topic");
        }
        if tx.try_send(Outbound::Publish { topic: location_topic, retain: false, payload: location_payload }).is_err() {
            tracing::warn!(publisher = %self.name, device_id = %state.device_id, "broker publish channel full, dropping location topic");
        }
        Ok(())
    }

    async fn stop(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Outbound::Shutdown).await;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.await;
        }
    }
}

async fn run_worker(config: BrokerConfig, mut rx: mpsc::Receiver<Outbound>, cancellation: CancellationToken, name: String) {
    let mut backoff = config.initial_backoff;

    'reconnect: loop {
        if cancellation.is_cancelled() {
            return;
        }

        let mut ws = match connect(&config).await {
            Ok(ws) => ws,
            Err(err) => {
                tracing::warn!(publisher = %name, "broker connect failed: {err}, retrying in {backoff:?}");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancellation.cancelled() => return,
                }
                backoff = (backoff * 2).min(config.max_backoff);
                continue 'reconnect;
            }
        };
        backoff = config.initial_backoff;

        let lwt_topic = format!("{}/{}", config.lwt_topic, config.client_id);
        if let Err(err) = publish_frame(&mut ws, &lwt_topic, true, &serde_json::Value::String("online".to_string())).await {
            tracing::warn!(publisher = %name, "failed to publish online status: {err}");
            continue 'reconnect;
        }
        tracing::info!(publisher = %name, broker = %config.broker_url, "broker connected");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    graceful_shutdown(&mut ws, &config, &name).await;
                    return;
                }
                received = rx.recv() => {
                    match received {
                        None => {
                            graceful_shutdown(&mut ws, &config, &name).await;
                            return;
                        }
                        Some(Outbound::Shutdown) => {
                            graceful_shutdown(&mut ws, &config, &name).await;
                            return;
                        }
                        Some(Outbound::Publish { topic, retain, payload }) => {
                            if let Err(err) = publish_frame(&mut ws, &topic, retain, &payload).await {
                                tracing::warn!(publisher = %name, "publish failed, reconnecting: {err}");
                                continue 'reconnect;
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn graceful_shutdown(ws: &mut WsStream, config: &BrokerConfig, name: &str) {
    let lwt_topic = format!("{}/{}", config.lwt_topic, config.client_id);
    if let Err(err) = publish_frame(ws, &lwt_topic, true, &serde_json::Value::String("offline".to_string())).await {
        tracing::warn!(publisher = %name, "failed to publish offline status on shutdown: {err}");
    } else {
        let _ = tokio::time::timeout(config.ack_wait, ws.next()).await;
    }
    let _ = tokio::time::timeout(config.shutdown_grace, ws.close()).await;
}

async fn connect(config: &BrokerConfig) -> Result<WsStream, BrokerError> {
    let (ws, _response) = tokio_tungstenite::connect_async(&config.broker_url)
        .await
        .map_err(|err| BrokerError::Connect(err.to_string()))?;
    Ok(ws)
}

async fn publish_frame(ws: &mut WsStream, topic: &str, retain: bool, payload: &serde_json::Value) -> Result<(), BrokerError> {
    let frame = BrokerFrame { topic, retain, payload };
    let json = serde_json::to_string(&frame).map_err(|err| BrokerError::Serialization(err.to_string()))?;
    ws.send(Message::Text(json.into())).await.map_err(|err| BrokerError::Ws(err.to_string()))
}
