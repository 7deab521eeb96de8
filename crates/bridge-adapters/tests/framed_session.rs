use std::net::SocketAddr;
use std::time::Duration;

use bridge_adapters::{FramedSessionAdapter, FramedSessionConfig};
use bridge_core::Adapter;
use bridge_protocol::{Attitude, FlightMode, FrameMessage, Location, Status, UnifiedState, Velocity};
use bridge_test_support::MockDeviceClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn sample_state(device_id: &str, alt_gnss: f64) -> UnifiedState {
    UnifiedState {
        device_id: device_id.to_string(),
        timestamp: 1_700_000_000_000,
        protocol_source: "unset".to_string(),
        location: Location {
            lat: 39.908722,
            lon: 116.397499,
            alt_baro: 90.0,
            alt_gnss,
            coordinate_system: "WGS84".to_string(),
            lat_gcj02: None,
            lon_gcj02: None,
            lat_bd09: None,
            lon_bd09: None,
        },
        attitude: Attitude::default(),
        velocity: Velocity::default(),
        status: Status { battery_percent: 75.0, flight_mode: FlightMode::Guided, armed: true, signal_quality: 80.0 },
    }
}

async fn spawn_adapter(
    mut config: FramedSessionConfig,
) -> (FramedSessionAdapter, CancellationToken, mpsc::Receiver<UnifiedState>, SocketAddr) {
    config.bind_addr = "127.0.0.1:0".to_string();
    let adapter = FramedSessionAdapter::new("framed-session", config);
    let cancellation = CancellationToken::new();
    let (tx, rx) = mpsc::channel(100);
    adapter.start(cancellation.clone(), tx).await.unwrap();
    let addr = adapter.local_addr().expect("adapter reports its bound address after start");
    (adapter, cancellation, rx, addr)
}

#[tokio::test]
async fn hello_then_state_frames_are_forwarded_with_protocol_source_stamped() {
    let config = FramedSessionConfig { max_clients: 4, ..Default::default() };
    let (adapter, cancellation, mut rx, addr) = spawn_adapter(config).await;

    let mut client = MockDeviceClient::connect(addr).await.unwrap();
    client.send_frame(&FrameMessage::Hello { device_id: "d1".into(), sdk_version: Some("1.2".into()) }).await.unwrap();
    let ack = client.recv_frame().await.unwrap();
    assert_eq!(ack.kind(), "ack");

    let state = sample_state("d1", 130.0);
    client
        .send_frame(&FrameMessage::State { device_id: Some("d1".into()), sdk_version: None, timestamp: Some(1), data: state })
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(received.device_id, "d1");
    assert_eq!(received.protocol_source, "framed-session");
    assert_eq!(received.location.alt_gnss, 130.0);

    cancellation.cancel();
    adapter.stop().await;
}

#[tokio::test]
async fn non_hello_first_frame_closes_the_session() {
    let (adapter, cancellation, _rx, addr) = spawn_adapter(FramedSessionConfig::default()).await;

    let mut client = MockDeviceClient::connect(addr).await.unwrap();
    client.send_frame(&FrameMessage::Heartbeat { device_id: None, timestamp: 1 }).await.unwrap();
    assert!(client.recv_eof().await);

    cancellation.cancel();
    adapter.stop().await;
}

#[tokio::test]
async fn oversize_declared_length_is_rejected_without_reading_payload() {
    let (adapter, cancellation, _rx, addr) = spawn_adapter(FramedSessionConfig::default()).await;

    let mut client = MockDeviceClient::connect(addr).await.unwrap();
    client.send_raw(bridge_protocol::frame::MAX_FRAME_BYTES + 1, b"ignored").await.unwrap();
    assert!(client.recv_eof().await);

    cancellation.cancel();
    adapter.stop().await;
}

#[tokio::test]
async fn session_read_timeout_closes_idle_connection() {
    let config = FramedSessionConfig { read_timeout: Duration::from_millis(100), ..Default::default() };
    let (adapter, cancellation, _rx, addr) = spawn_adapter(config).await;

    let mut client = MockDeviceClient::connect(addr).await.unwrap();
    client.send_frame(&FrameMessage::Hello { device_id: "d1".into(), sdk_version: None }).await.unwrap();
    let _ack = client.recv_frame().await.unwrap();

    assert!(client.recv_eof().await);

    cancellation.cancel();
    adapter.stop().await;
}

#[tokio::test]
async fn duplicate_hello_for_an_active_device_id_is_rejected() {
    let config = FramedSessionConfig { max_clients: 4, ..Default::default() };
    let (adapter, cancellation, _rx, addr) = spawn_adapter(config).await;

    let mut first = MockDeviceClient::connect(addr).await.unwrap();
    first.send_frame(&FrameMessage::Hello { device_id: "d1".into(), sdk_version: None }).await.unwrap();
    let ack = first.recv_frame().await.unwrap();
    assert_eq!(ack.kind(), "ack");

    let mut second = MockDeviceClient::connect(addr).await.unwrap();
    second.send_frame(&FrameMessage::Hello { device_id: "d1".into(), sdk_version: None }).await.unwrap();
    assert!(second.recv_eof().await);

    cancellation.cancel();
    adapter.stop().await;
}

#[tokio::test]
async fn excess_connections_beyond_max_clients_are_closed_immediately() {
    let config = FramedSessionConfig { max_clients: 1, ..Default::default() };
    let (adapter, cancellation, _rx, addr) = spawn_adapter(config).await;

    let mut first = MockDeviceClient::connect(addr).await.unwrap();
    first.send_frame(&FrameMessage::Hello { device_id: "d1".into(), sdk_version: None }).await.unwrap();
    let _ack = first.recv_frame().await.unwrap();

    let mut second = MockDeviceClient::connect(addr).await.unwrap();
    assert!(second.recv_eof().await);

    cancellation.cancel();
    adapter.stop().await;
}
