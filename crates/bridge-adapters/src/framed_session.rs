//! The framed-session adapter: accepts TCP connections carrying
//! length-prefixed JSON frames (`uint32` big-endian length + UTF-8
//! JSON), one session per connection, up to `max_clients` concurrent.
//!
//! ```text
//! NEW ──recv(hello)──► AUTHED ──send(ack)──► RUNNING
//!                                              │
//!                         recv(state) ──publish┤
//!                         recv(heartbeat)───────┤
//!                         timeout/read-err/cancel ──► CLOSED
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bridge_core::adapter::emit_non_blocking;
use bridge_core::Adapter;
use bridge_protocol::frame::MAX_FRAME_BYTES;
use bridge_protocol::{FrameMessage, UnifiedState};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FramedSessionConfig {
    pub bind_addr: String,
    pub max_clients: usize,
    pub heartbeat_interval: Duration,
    pub read_timeout: Duration,
}

impl Default for FramedSessionConfig {
    fn default() -> Self {
        FramedSessionConfig {
            bind_addr: "0.0.0.0:7800".to_string(),
            max_clients: 256,
            heartbeat_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Accepts device connections and decodes the framed wire protocol into
/// [`UnifiedState`] records. One background task runs the accept loop;
/// one further task runs per live session.
pub struct FramedSessionAdapter {
    name: String,
    config: FramedSessionConfig,
    semaphore: std::sync::Arc<Semaphore>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    session_handles: std::sync::Arc<Mutex<Vec<JoinHandle<()>>>>,
    bound_addr: Mutex<Option<SocketAddr>>,
    active_devices: std::sync::Arc<DashMap<String, ()>>,
}

impl FramedSessionAdapter {
    pub fn new(name: impl Into<String>, config: FramedSessionConfig) -> Self {
        let max_clients = config.max_clients.max(1);
        FramedSessionAdapter {
            name: name.into(),
            config,
            semaphore: std::sync::Arc::new(Semaphore::new(max_clients)),
            accept_handle: Mutex::new(None),
            session_handles: std::sync::Arc::new(Mutex::new(Vec::new())),
            bound_addr: Mutex::new(None),
            active_devices: std::sync::Arc::new(DashMap::new()),
        }
    }

    /// The socket address actually bound by `start`, once it has run.
    /// Useful when `bind_addr` requests an ephemeral port (`:0`).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }
}

#[async_trait]
impl Adapter for FramedSessionAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        &self,
        cancellation: CancellationToken,
        out: mpsc::Sender<UnifiedState>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let bound = listener.local_addr()?;
        *self.bound_addr.lock() = Some(bound);
        tracing::info!(
            adapter = %self.name,
            addr = %bound,
            max_clients = self.config.max_clients,
            "framed-session adapter listening"
        );

        let semaphore = self.semaphore.clone();
        let session_handles = self.session_handles.clone();
        let active_devices = self.active_devices.clone();
        let name = self.name.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let read_timeout = self.config.read_timeout;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        tracing::debug!(adapter = %name, "accept loop cancelled");
                        break;
                    }
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                tracing::warn!(adapter = %name, "accept error: {err}");
                                continue;
                            }
                        };
                        let permit = match semaphore.clone().try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                tracing::warn!(adapter = %name, %peer, "max_clients reached, closing connection");
                                drop(stream);
                                continue;
                            }
                        };
                        let tx = out.clone();
                        let session_cancel = cancellation.clone();
                        let session_name = name.clone();
                        let session_devices = active_devices.clone();
                        let session_handle = tokio::spawn(run_session(
                            stream,
                            peer,
                            tx,
                            session_cancel,
                            heartbeat_interval,
                            read_timeout,
                            session_name,
                            permit,
                            session_devices,
                        ));
                        session_handles.lock().push(session_handle);
                    }
                }
            }
        });

        *self.accept_handle.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(handle) = self.accept_handle.lock().take() {
            let _ = handle.await;
        }
        let handles: Vec<_> = std::mem::take(&mut *self.session_handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<UnifiedState>,
    cancellation: CancellationToken,
    heartbeat_interval: Duration,
    read_timeout: Duration,
    adapter_name: String,
    _permit: OwnedSemaphorePermit,
    active_devices: std::sync::Arc<DashMap<String, ()>>,
) {
    // Per spec the two timeouts coincide at their defaults (60s); the
    // per-read timeout below covers both "dead socket" and "no frame
    // since hello" cases without tracking a separate last-activity clock.
    let _ = heartbeat_interval;
    let mut device_id: Option<String> = None;

    loop {
        let outcome = tokio::select! {
            _ = cancellation.cancelled() => {
                tracing::debug!(adapter = %adapter_name, %peer, "session unwound by cancellation");
                break;
            }
            result = tokio::time::timeout(read_timeout, read_frame(&mut stream)) => result,
        };

        let frame = match outcome {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                tracing::debug!(adapter = %adapter_name, %peer, "peer closed connection");
                break;
            }
            Ok(Err(err)) => {
                tracing::warn!(adapter = %adapter_name, %peer, "frame error: {err}");
                break;
            }
            Err(_elapsed) => {
                tracing::warn!(adapter = %adapter_name, %peer, "session timed out awaiting a frame");
                break;
            }
        };

        match (&device_id, frame) {
            (None, FrameMessage::Hello { device_id: id, .. }) => {
                if id.is_empty() {
                    tracing::warn!(adapter = %adapter_name, %peer, "hello with empty device_id, closing");
                    break;
                }
                if active_devices.insert(id.clone(), ()).is_some() {
                    tracing::warn!(adapter = %adapter_name, %peer, device_id = %id, "device already has an active session, closing");
                    break;
                }
                if write_frame(&mut stream, &FrameMessage::Ack { sdk_version: None }).await.is_err() {
                    active_devices.remove(&id);
                    break;
                }
                tracing::info!(adapter = %adapter_name, %peer, device_id = %id, "session authenticated");
                device_id = Some(id);
            }
            (None, other) => {
                tracing::warn!(adapter = %adapter_name, %peer, kind = other.kind(), "expected hello as first frame, closing");
                break;
            }
            (Some(_), FrameMessage::State { data, .. }) => {
                let mut state = data;
                state.protocol_source = adapter_name.clone();
                emit_non_blocking(&tx, state, &adapter_name);
            }
            (Some(_), FrameMessage::Heartbeat { .. }) => {
                tracing::trace!(adapter = %adapter_name, %peer, "heartbeat received");
            }
            (Some(_), other) => {
                tracing::warn!(adapter = %adapter_name, %peer, kind = other.kind(), "unrecognised frame in RUNNING, continuing");
            }
        }
    }

    if let Some(id) = &device_id {
        active_devices.remove(id);
    }
}

/// Reads one length-prefixed frame. `Ok(None)` means the peer closed the
/// connection cleanly before sending a length prefix. A declared length
/// over [`MAX_FRAME_BYTES`] is rejected without reading the payload.
async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<FrameMessage>> {
    let len = match stream.read_u32().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame declares length {len}, exceeding max {MAX_FRAME_BYTES}"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    FrameMessage::from_json_bytes(&buf)
        .map(Some)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))
}

async fn write_frame(stream: &mut TcpStream, msg: &FrameMessage) -> std::io::Result<()> {
    let payload = msg
        .to_json_bytes()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(&payload).await?;
    Ok(())
}
