//! Track point: the record stored by the per-device trajectory ring.

use crate::UnifiedState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    /// Degrees, taken from the state's yaw.
    pub heading: f64,
    /// Derived `‖(vx,vy,vz)‖₂` at record time.
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_gcj02: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon_gcj02: Option<f64>,
}

impl TrackPoint {
    /// Derive a track point from a unified state, using `now` as the
    /// recorded timestamp (the caller resolves `state.timestamp == 0`
    /// to the current wall clock before calling this).
    pub fn from_state(state: &UnifiedState, now: i64) -> Self {
        TrackPoint {
            timestamp: now,
            lat: state.location.lat,
            lon: state.location.lon,
            alt: state.location.alt_gnss,
            heading: state.attitude.yaw,
            speed: state.velocity.magnitude(),
            lat_gcj02: state.location.lat_gcj02,
            lon_gcj02: state.location.lon_gcj02,
        }
    }
}
