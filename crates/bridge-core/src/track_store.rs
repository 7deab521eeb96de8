use std::collections::VecDeque;

use bridge_protocol::{TrackPoint, UnifiedState};
use dashmap::DashMap;

/// Outcome of [`TrackStore::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// Non-fatal: the sampling gate was not yet due.
    Skipped,
}

struct DeviceTrack {
    points: VecDeque<TrackPoint>,
    last_sampled: i64,
}

impl DeviceTrack {
    fn new() -> Self {
        DeviceTrack { points: VecDeque::new(), last_sampled: i64::MIN }
    }

    fn push(&mut self, point: TrackPoint, max_points: usize) {
        if self.points.len() >= max_points {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }
}

/// Per-device bounded ring of trajectory points with a sampling gate.
pub struct TrackStore {
    tracks: DashMap<String, DeviceTrack>,
    max_points: usize,
    sample_interval_ms: i64,
}

impl TrackStore {
    pub fn new(max_points: usize, sample_interval_ms: i64) -> Self {
        TrackStore { tracks: DashMap::new(), max_points, sample_interval_ms }
    }

    /// Records a sample unless the per-device sampling gate is still
    /// closed. `state.timestamp == 0` falls back to `now`.
    pub fn record(&self, state: &UnifiedState, now: i64) -> RecordOutcome {
        let sample_time = if state.timestamp == 0 { now } else { state.timestamp };
        let mut entry = self.tracks.entry(state.device_id.clone()).or_insert_with(DeviceTrack::new);
        if entry.last_sampled != i64::MIN && sample_time - entry.last_sampled < self.sample_interval_ms {
            return RecordOutcome::Skipped;
        }
        let point = TrackPoint::from_state(state, sample_time);
        entry.push(point, self.max_points);
        entry.last_sampled = sample_time;
        RecordOutcome::Recorded
    }

    pub fn get_all(&self, device_id: &str) -> Vec<TrackPoint> {
        self.tracks.get(device_id).map(|t| t.points.iter().copied().collect()).unwrap_or_default()
    }

    pub fn get_last(&self, device_id: &str, n: usize) -> Vec<TrackPoint> {
        self.tracks
            .get(device_id)
            .map(|t| {
                let len = t.points.len();
                let skip = len.saturating_sub(n);
                t.points.iter().skip(skip).copied().collect()
            })
            .unwrap_or_default()
    }

    pub fn get_since(&self, device_id: &str, since_ms: i64) -> Vec<TrackPoint> {
        self.tracks
            .get(device_id)
            .map(|t| t.points.iter().filter(|p| p.timestamp > since_ms).copied().collect())
            .unwrap_or_default()
    }

    pub fn size(&self, device_id: &str) -> usize {
        self.tracks.get(device_id).map(|t| t.points.len()).unwrap_or(0)
    }

    pub fn clear(&self, device_id: &str) {
        self.tracks.remove(device_id);
    }
}
