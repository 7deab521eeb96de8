use thiserror::Error;

/// Errors surfaced while decoding or validating a wire frame. These are
/// always handled locally by the caller (close the session / drop the
/// sample) — never propagated to the engine.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame exceeds maximum size of {max} bytes (declared {declared})")]
    FrameTooLarge { declared: u32, max: u32 },
    #[error("malformed JSON envelope: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("unrecognised message type: {0}")]
    UnknownType(String),
    #[error("hello frame missing device_id")]
    MissingDeviceId,
    #[error("state frame missing data payload")]
    MissingStatePayload,
    #[error("heartbeat frame missing timestamp")]
    MissingHeartbeatTimestamp,
}
