//! Canonical data model and wire envelope for the telemetry bridge.
//!
//! [`UnifiedState`] is the record that crosses every component boundary.
//! [`FrameMessage`] is the JSON envelope carried by the framed-session
//! adapter's length-prefixed wire protocol.

use serde::{Deserialize, Serialize};

pub mod error;
pub mod frame;
pub mod state;
pub mod track;

pub use error::ProtocolError;
pub use frame::FrameMessage;
pub use state::{Attitude, FlightMode, Location, Status, UnifiedState, Velocity};
pub use track::TrackPoint;

/// Severity ordering used by the log buffer and its subscriber filters.
///
/// `debug < info < warn < error`. Derives `Ord` so a subscriber's filter
/// can be compared directly against an entry's level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Best-effort parse used by the legacy line-sink adapter, which only
    /// ever sees free-text log lines. Unrecognised input defaults to `Info`.
    pub fn from_keyword(s: &str) -> Self {
        let lower = s.to_ascii_lowercase();
        if lower.contains("error") {
            LogLevel::Error
        } else if lower.contains("warn") {
            LogLevel::Warn
        } else if lower.contains("debug") {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

/// One entry in the global log buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: i64,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn log_level_from_keyword() {
        assert_eq!(LogLevel::from_keyword("ERROR: boom"), LogLevel::Error);
        assert_eq!(LogLevel::from_keyword("a warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from_keyword("debugging thing"), LogLevel::Debug);
        assert_eq!(LogLevel::from_keyword("just a note"), LogLevel::Info);
    }
}
