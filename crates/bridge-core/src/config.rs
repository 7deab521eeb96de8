/// Construction-time configuration for the routing engine. Loading this
/// from a TOML file or environment is the CLI/config collaborator's job
/// — the engine only ever consumes an already-built `EngineConfig`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rate_hz: f64,
    pub convert_gcj02: bool,
    pub convert_bd09: bool,
    pub track_enabled: bool,
    pub track_max_points: usize,
    pub track_sample_interval_ms: i64,
    /// Capacity of the bounded event channel shared by every adapter.
    pub event_channel_capacity: usize,
    /// Capacity of the global log buffer ring.
    pub log_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            rate_hz: 10.0,
            convert_gcj02: false,
            convert_bd09: false,
            track_enabled: true,
            track_max_points: 1000,
            track_sample_interval_ms: 0,
            event_channel_capacity: 100,
            log_buffer_capacity: bridge_log::DEFAULT_CAPACITY,
        }
    }
}
