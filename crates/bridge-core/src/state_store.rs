use bridge_protocol::UnifiedState;
use dashmap::DashMap;

/// Latest-value map keyed by `device_id`, last-writer-wins.
pub struct StateStore {
    states: DashMap<String, UnifiedState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        StateStore { states: DashMap::new() }
    }

    pub fn update(&self, state: UnifiedState) {
        self.states.insert(state.device_id.clone(), state);
    }

    pub fn get(&self, device_id: &str) -> Option<UnifiedState> {
        self.states.get(device_id).map(|r| r.clone())
    }

    /// Snapshot copy — never aliased to internal storage, so callers
    /// can't observe a partially-updated view.
    pub fn get_all(&self) -> Vec<UnifiedState> {
        self.states.iter().map(|r| r.clone()).collect()
    }

    pub fn delete(&self, device_id: &str) {
        self.states.remove(device_id);
    }

    pub fn count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::{Attitude, Location, Status, Velocity};

    fn state(device_id: &str, timestamp: i64) -> UnifiedState {
        UnifiedState {
            device_id: device_id.to_string(),
            timestamp,
            protocol_source: "test".into(),
            location: Location {
                lat: 0.0,
                lon: 0.0,
                alt_baro: 0.0,
                alt_gnss: 0.0,
                coordinate_system: "WGS84".to_string(),
                lat_gcj02: None,
                lon_gcj02: None,
                lat_bd09: None,
                lon_bd09: None,
            },
            attitude: Attitude::default(),
            velocity: Velocity::default(),
            status: Status::default(),
        }
    }

    #[test]
    fn update_is_last_writer_wins() {
        let store = StateStore::new();
        store.update(state("d1", 1));
        store.update(state("d1", 2));
        assert_eq!(store.get("d1").unwrap().timestamp, 2);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn get_absent_device_returns_none() {
        let store = StateStore::new();
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn get_all_is_a_snapshot() {
        let store = StateStore::new();
        store.update(state("d1", 1));
        store.update(state("d2", 1));
        let mut all = store.get_all();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        assert_eq!(all.len(), 2);
        store.update(state("d3", 1));
        assert_eq!(all.len(), 2); // snapshot unaffected by later writes
    }

    #[test]
    fn delete_removes_the_device() {
        let store = StateStore::new();
        store.update(state("d1", 1));
        store.delete("d1");
        assert!(store.get("d1").is_none());
        assert_eq!(store.count(), 0);
    }
}
