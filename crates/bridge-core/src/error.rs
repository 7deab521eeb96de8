use thiserror::Error;

/// Failures an adapter or publisher can report from `start`. These are
/// the only errors the engine ever propagates — everything else (a
/// single session's protocol violation, one publisher's dropped
/// connection) is handled locally and only surfaces as a log line.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("adapter '{name}' failed to start: {source}")]
    AdapterStartFailed { name: String, source: Box<dyn std::error::Error + Send + Sync> },
    #[error("publisher '{name}' failed to start: {source}")]
    PublisherStartFailed { name: String, source: Box<dyn std::error::Error + Send + Sync> },
}

/// Auth-related outcomes, returned verbatim to the REST collaborator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid_credentials")]
    InvalidCredentials,
    #[error("invalid_token")]
    InvalidToken,
    #[error("token_expired")]
    TokenExpired,
}
