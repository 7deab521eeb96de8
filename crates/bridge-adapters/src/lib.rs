//! Southbound adapters: TCP-facing sources that feed the routing engine's
//! event channel.

pub mod framed_session;

pub use framed_session::{FramedSessionAdapter, FramedSessionConfig};
