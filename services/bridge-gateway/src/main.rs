// bridge-gateway: wires the framed-session adapter, broker publisher, and
// broadcast publisher into a running routing engine. Config-file loading,
// the REST surface, and signal-handling policy are external collaborators
// per the core's contract; this binary only needs enough of each to be a
// runnable service.

use std::env;
use std::sync::Arc;

use bridge_adapters::{FramedSessionAdapter, FramedSessionConfig};
use bridge_core::{Adapter, EngineConfig, Publisher, RoutingEngine};
use bridge_publishers::{BroadcastConfig, BroadcastPublisher, BrokerConfig, BrokerPublisher};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    info!(version = env!("CARGO_PKG_VERSION"), "bridge-gateway starting");

    let framed_session_addr = env::var("FRAMED_SESSION_ADDR").unwrap_or_else(|_| "0.0.0.0:7800".to_owned());
    let broadcast_addr = env::var("BROADCAST_ADDR").unwrap_or_else(|_| "0.0.0.0:7900".to_owned());
    let broker_url = env::var("BROKER_URL").unwrap_or_else(|_| "ws://127.0.0.1:9001".to_owned());

    let adapters: Vec<Arc<dyn Adapter>> = vec![Arc::new(FramedSessionAdapter::new(
        "framed-session",
        FramedSessionConfig { bind_addr: framed_session_addr, ..FramedSessionConfig::default() },
    ))];

    let publishers: Vec<Arc<dyn Publisher>> = vec![
        Arc::new(BrokerPublisher::new("broker", BrokerConfig { broker_url, ..BrokerConfig::default() })),
        Arc::new(BroadcastPublisher::new(
            "broadcast",
            BroadcastConfig { bind_addr: broadcast_addr, ..BroadcastConfig::default() },
        )),
    ];

    // `set_state_callback` is left unregistered here: it's the REST
    // collaborator's hook (out of scope for this binary), not something
    // the gateway itself needs — the broadcast publisher above already
    // receives every admitted state through the normal publisher fan-out.
    let engine = RoutingEngine::new(EngineConfig::default(), adapters, publishers, 10, 20);

    if let Err(err) = engine.start().await {
        tracing::error!("failed to start engine: {err}");
        std::process::exit(1);
    }
    info!(
        adapters = ?engine.get_adapter_names(),
        publishers = ?engine.get_publisher_names(),
        "bridge-gateway running"
    );

    shutdown_signal().await;

    info!("shutting down");
    engine.stop().await;
    info!("bridge-gateway shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
