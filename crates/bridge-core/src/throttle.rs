use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

/// Per-device minimum-interval publish gate. Rate is global; only the
/// last-admit timestamp is tracked per device.
pub struct Throttler {
    last_admit: DashMap<String, i64>,
    rate_hz: Mutex<f64>,
}

impl Throttler {
    pub fn new(rate_hz: f64) -> Self {
        Throttler { last_admit: DashMap::new(), rate_hz: Mutex::new(normalize_rate(rate_hz)) }
    }

    /// `hz <= 0` normalises to 1 Hz.
    pub fn set_rate(&self, hz: f64) {
        *self.rate_hz.lock() = normalize_rate(hz);
    }

    pub fn get_rate(&self) -> f64 {
        *self.rate_hz.lock()
    }

    /// Atomically tests `now - last_admit >= 1/rate` for `device_id` and,
    /// on success, advances `last_admit` to `now`.
    pub fn should_publish(&self, device_id: &str, now_ms: i64) -> bool {
        let interval_ms = (1000.0 / self.get_rate()).round() as i64;
        match self.last_admit.entry(device_id.to_string()) {
            Entry::Occupied(mut e) => {
                if now_ms - *e.get() >= interval_ms {
                    *e.get_mut() = now_ms;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(e) => {
                e.insert(now_ms);
                true
            }
        }
    }

    pub fn reset_device(&self, device_id: &str) {
        self.last_admit.remove(device_id);
    }

    pub fn reset_all(&self) {
        self.last_admit.clear();
    }
}

fn normalize_rate(hz: f64) -> f64 {
    if hz <= 0.0 {
        1.0
    } else {
        hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_first_sample_for_a_new_device() {
        let t = Throttler::new(10.0);
        assert!(t.should_publish("d1", 0));
    }

    #[test]
    fn denies_within_interval_then_admits_after() {
        let t = Throttler::new(10.0); // 100ms interval
        assert!(t.should_publish("d1", 0));
        assert!(!t.should_publish("d1", 50));
        assert!(t.should_publish("d1", 100));
    }

    #[test]
    fn rate_is_global_but_admission_per_device() {
        let t = Throttler::new(10.0);
        assert!(t.should_publish("d1", 0));
        assert!(t.should_publish("d2", 0));
        assert!(!t.should_publish("d1", 10));
        assert!(!t.should_publish("d2", 10));
    }

    #[test]
    fn set_rate_clamps_non_positive_to_one_hz() {
        let t = Throttler::new(10.0);
        t.set_rate(0.0);
        assert_eq!(t.get_rate(), 1.0);
        t.set_rate(-5.0);
        assert_eq!(t.get_rate(), 1.0);
        t.set_rate(20.0);
        assert_eq!(t.get_rate(), 20.0);
    }

    #[test]
    fn reset_device_forgets_admission_history() {
        let t = Throttler::new(10.0);
        t.should_publish("d1", 0);
        assert!(!t.should_publish("d1", 10));
        t.reset_device("d1");
        assert!(t.should_publish("d1", 10));
    }

    #[test]
    fn reset_all_clears_every_device() {
        let t = Throttler::new(10.0);
        t.should_publish("d1", 0);
        t.should_publish("d2", 0);
        t.reset_all();
        assert!(t.should_publish("d1", 5));
        assert!(t.should_publish("d2", 5));
    }
}
