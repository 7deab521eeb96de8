//! Northbound publishers: consumers of the routing engine's fan-out.

pub mod broadcast;
pub mod broker;

pub use broadcast::{BroadcastConfig, BroadcastPublisher};
pub use broker::{BrokerConfig, BrokerPublisher};
