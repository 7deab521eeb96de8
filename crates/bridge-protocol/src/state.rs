//! The unified state record: the single tuple that crosses every
//! component boundary (adapter → engine → publisher).

use serde::{Deserialize, Serialize};

/// Closed set of autopilot flight modes. Unknown wire values decode to
/// `Unknown` rather than rejecting the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    Unknown,
    Manual,
    Stabilize,
    AltHold,
    Loiter,
    Auto,
    Guided,
    Rtl,
    Land,
    Takeoff,
    Emergency,
}

impl Default for FlightMode {
    fn default() -> Self {
        FlightMode::Unknown
    }
}

/// Geodetic position. `lat`/`lon`/`alt_*` are always WGS84 on input;
/// `lat_gcj02`/`lon_gcj02`/`lat_bd09`/`lon_bd09` are filled in by the
/// coordinate converter and stay absent (not zeroed) when conversion is
/// disabled or the point falls outside the China bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub alt_baro: f64,
    pub alt_gnss: f64,
    #[serde(default = "coordinate_system_wgs84")]
    pub coordinate_system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_gcj02: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon_gcj02: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_bd09: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon_bd09: Option<f64>,
}

fn coordinate_system_wgs84() -> String {
    "WGS84".to_string()
}

/// Radians for roll/pitch, degrees (0-360) for yaw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Velocity in the NED (north-east-down) frame, metres per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

impl Velocity {
    /// Euclidean speed, used to derive `TrackPoint::speed`.
    pub fn magnitude(&self) -> f64 {
        (self.vx * self.vx + self.vy * self.vy + self.vz * self.vz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub battery_percent: f64,
    pub flight_mode: FlightMode,
    pub armed: bool,
    pub signal_quality: f64,
}

/// The canonical telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedState {
    pub device_id: String,
    /// Milliseconds since epoch. Monotonic per device is desired, not
    /// enforced — duplicate and out-of-order timestamps are tolerated.
    pub timestamp: i64,
    /// Identifies the adapter that produced this record (e.g.
    /// `"framed-session"`, `"autopilot-binary"`, `"simulated"`).
    pub protocol_source: String,
    pub location: Location,
    pub attitude: Attitude,
    pub velocity: Velocity,
    pub status: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnifiedState {
        UnifiedState {
            device_id: "d1".into(),
            timestamp: 1_700_000_000_000,
            protocol_source: "framed-session".into(),
            location: Location {
                lat: 39.908722,
                lon: 116.397499,
                alt_baro: 100.0,
                alt_gnss: 130.0,
                coordinate_system: "WGS84".to_string(),
                lat_gcj02: Some(39.911119),
                lon_gcj02: Some(116.403963),
                lat_bd09: None,
                lon_bd09: None,
            },
            attitude: Attitude { roll: 0.01, pitch: -0.02, yaw: 270.0 },
            velocity: Velocity { vx: 1.0, vy: 0.0, vz: 0.0 },
            status: Status {
                battery_percent: 87.5,
                flight_mode: FlightMode::Guided,
                armed: true,
                signal_quality: 92.0,
            },
        }
    }

    #[test]
    fn json_round_trip_preserves_every_field() {
        let original = sample();
        let json = serde_json::to_string(&original).unwrap();
        let decoded: UnifiedState = serde_json::from_str(&json).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn absent_derived_coordinates_are_omitted_not_zeroed() {
        let mut state = sample();
        state.location.lat_gcj02 = None;
        state.location.lon_gcj02 = None;
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("lat_gcj02"));
        assert!(!json.contains("lon_gcj02"));
    }

    #[test]
    fn velocity_magnitude_is_euclidean() {
        let v = Velocity { vx: 3.0, vy: 4.0, vz: 0.0 };
        assert!((v.magnitude() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_flight_mode_is_default() {
        assert_eq!(FlightMode::default(), FlightMode::Unknown);
    }
}
