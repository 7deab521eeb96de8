//! Shared test harness for the telemetry bridge's integration suites:
//! a mock device that speaks the framed-session wire protocol, for
//! driving adapters under test without a real autopilot SDK.

pub mod mock_device_client;

pub use mock_device_client::MockDeviceClient;
