//! WGS84 ↔ GCJ02 ↔ BD09 coordinate conversion.
//!
//! Pure functions, no I/O, no shared state. `convert` is the entry point
//! the routing engine calls per sample; the rest are exposed for testing
//! and for callers that only need one leg of the pipeline.

/// China bounding box used to gate the WGS84 → GCJ02 offset. Outside
/// this box the transform is the identity — GCJ02 only applies within
/// mainland China's regulatory area.
const CHINA_LON_MIN: f64 = 72.004;
const CHINA_LON_MAX: f64 = 137.8347;
const CHINA_LAT_MIN: f64 = 0.8293;
const CHINA_LAT_MAX: f64 = 55.8271;

/// Krasovsky ellipsoid semi-major axis (metres).
const A: f64 = 6_378_245.0;
/// Krasovsky ellipsoid eccentricity squared.
const EE: f64 = 0.006_693_421_622_965_943_23;

/// Bundle of a raw position plus whichever derived systems were enabled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertedPosition {
    pub lat: f64,
    pub lon: f64,
    pub lat_gcj02: Option<f64>,
    pub lon_gcj02: Option<f64>,
    pub lat_bd09: Option<f64>,
    pub lon_bd09: Option<f64>,
}

/// True iff `(lat, lon)` falls inside the China regulatory bounding box.
pub fn in_china(lat: f64, lon: f64) -> bool {
    (CHINA_LON_MIN..=CHINA_LON_MAX).contains(&lon) && (CHINA_LAT_MIN..=CHINA_LAT_MAX).contains(&lat)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y
        + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * std::f64::consts::PI).sin()
        + 20.0 * (2.0 * x * std::f64::consts::PI).sin())
        * 2.0
        / 3.0;
    ret += (20.0 * (y * std::f64::consts::PI).sin() + 40.0 * (y / 3.0 * std::f64::consts::PI).sin())
        * 2.0
        / 3.0;
    ret += (160.0 * (y / 12.0 * std::f64::consts::PI).sin()
        + 320.0 * (y * std::f64::consts::PI / 30.0).sin())
        * 2.0
        / 3.0;
    ret
}

fn transform_lon(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * std::f64::consts::PI).sin()
        + 20.0 * (2.0 * x * std::f64::consts::PI).sin())
        * 2.0
        / 3.0;
    ret += (20.0 * (x * std::f64::consts::PI).sin() + 40.0 * (x / 3.0 * std::f64::consts::PI).sin())
        * 2.0
        / 3.0;
    ret += (150.0 * (x / 12.0 * std::f64::consts::PI).sin()
        + 300.0 * (x / 30.0 * std::f64::consts::PI).sin())
        * 2.0
        / 3.0;
    ret
}

/// WGS84 → GCJ02. Identity outside the China bounding box.
pub fn wgs84_to_gcj02(lat: f64, lon: f64) -> (f64, f64) {
    if !in_china(lat, lon) {
        return (lat, lon);
    }
    let d_lat = transform_lat(lon - 105.0, lat - 35.0);
    let d_lon = transform_lon(lon - 105.0, lat - 35.0);
    let rad_lat = lat / 180.0 * std::f64::consts::PI;
    let magic = rad_lat.sin();
    let magic = 1.0 - EE * magic * magic;
    let sqrt_magic = magic.sqrt();
    let d_lat = (d_lat * 180.0) / ((A * (1.0 - EE)) / (magic * sqrt_magic) * std::f64::consts::PI);
    let d_lon = (d_lon * 180.0) / (A / sqrt_magic * rad_lat.cos() * std::f64::consts::PI);
    (lat + d_lat, lon + d_lon)
}

/// GCJ02 → WGS84, via three-iteration fixed-point refinement of the
/// forward transform (no closed-form inverse exists).
pub fn gcj02_to_wgs84(lat: f64, lon: f64) -> (f64, f64) {
    if !in_china(lat, lon) {
        return (lat, lon);
    }
    let (mut guess_lat, mut guess_lon) = (lat, lon);
    for _ in 0..3 {
        let (fwd_lat, fwd_lon) = wgs84_to_gcj02(guess_lat, guess_lon);
        guess_lat -= fwd_lat - lat;
        guess_lon -= fwd_lon - lon;
    }
    (guess_lat, guess_lon)
}

const BD09_LON_OFFSET: f64 = 0.0065;
const BD09_LAT_OFFSET: f64 = 0.006;

/// GCJ02 → BD09, the trig-polar transform Baidu Maps uses on top of
/// the national GCJ02 offset.
pub fn gcj02_to_bd09(lat: f64, lon: f64) -> (f64, f64) {
    let z = (lat * lat + lon * lon).sqrt() + 0.00002 * (lat * std::f64::consts::PI * 3000.0 / 180.0).sin();
    let theta = lat.atan2(lon) + 0.000003 * (lon * std::f64::consts::PI * 3000.0 / 180.0).cos();
    let bd_lon = z * theta.cos() + BD09_LON_OFFSET;
    let bd_lat = z * theta.sin() + BD09_LAT_OFFSET;
    (bd_lat, bd_lon)
}

/// BD09 → GCJ02, the inverse of [`gcj02_to_bd09`].
pub fn bd09_to_gcj02(lat: f64, lon: f64) -> (f64, f64) {
    let x = lon - BD09_LON_OFFSET;
    let y = lat - BD09_LAT_OFFSET;
    let z = (x * x + y * y).sqrt() - 0.00002 * (y * std::f64::consts::PI * 3000.0 / 180.0).sin();
    let theta = y.atan2(x) - 0.000003 * (x * std::f64::consts::PI * 3000.0 / 180.0).cos();
    let gcj_lon = z * theta.cos();
    let gcj_lat = z * theta.sin();
    (gcj_lat, gcj_lon)
}

/// Convert a raw WGS84 point, deriving GCJ02 and/or BD09 when the
/// corresponding flag is set. Fields stay `None` when disabled or when
/// the point is outside the China bounding box — never zeroed.
pub fn convert(lat: f64, lon: f64, want_gcj02: bool, want_bd09: bool) -> ConvertedPosition {
    let inside = in_china(lat, lon);
    let gcj02 = if want_gcj02 && inside { Some(wgs84_to_gcj02(lat, lon)) } else { None };
    let bd09 = if want_bd09 && inside {
        let (glat, glon) = gcj02.unwrap_or_else(|| wgs84_to_gcj02(lat, lon));
        Some(gcj02_to_bd09(glat, glon))
    } else {
        None
    };
    ConvertedPosition {
        lat,
        lon,
        lat_gcj02: gcj02.map(|(la, _)| la),
        lon_gcj02: gcj02.map(|(_, lo)| lo),
        lat_bd09: bd09.map(|(la, _)| la),
        lon_bd09: bd09.map(|(_, lo)| lo),
    }
}
