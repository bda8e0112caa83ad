//! Per-server drift profile cache (spec §4.5, §9 Open Question): a rolling
//! history of recent `total_offset_ms` samples Phase 2 consults to seed
//! `offset_hint`, repurposed from the teacher's rolling-latency/P95
//! machinery (`HttpMonitor::calculate_p95`) onto offset samples instead of
//! latency samples.

use std::collections::HashMap;
use std::sync::Mutex;

const MAX_SAMPLES_PER_SERVER: usize = 12;

pub struct DriftCache {
    samples: Mutex<HashMap<String, Vec<f64>>>,
}

impl Default for DriftCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DriftCache {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Records a run's `total_offset_ms` for `server_id`, keeping at most
    /// [`MAX_SAMPLES_PER_SERVER`] most-recent samples.
    pub fn record(&self, server_id: &str, total_offset_ms: f64) {
        let mut samples = self.samples.lock().unwrap();
        let history = samples.entry(server_id.to_string()).or_default();
        history.push(total_offset_ms);
        if history.len() > MAX_SAMPLES_PER_SERVER {
            history.remove(0);
        }
    }

    /// The `offset_hint` Phase 2 should seed with: the most recent sample,
    /// reduced to its fractional-second component (§9 resolves the Open
    /// Question on initialization: from the cached value if any, else 0 —
    /// here "cached value" is this cache's most recent sample).
    pub fn hint_for(&self, server_id: &str) -> Option<f64> {
        self.samples
            .lock()
            .unwrap()
            .get(server_id)
            .and_then(|history| history.last())
            .map(|offset_ms| offset_ms.rem_euclid(1000.0))
    }

    /// Median absolute sample-to-sample change, used to flag a server
    /// whose clock is drifting faster than `drift_warning_threshold_ms`
    /// (spec §6 configuration).
    pub fn drift_rate_ms(&self, server_id: &str) -> Option<f64> {
        let samples = self.samples.lock().unwrap();
        let history = samples.get(server_id)?;
        if history.len() < 2 {
            return None;
        }
        let mut deltas: Vec<f64> = history
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .collect();
        deltas.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Some(deltas[deltas.len() / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_defaults_to_none_when_empty() {
        let cache = DriftCache::new();
        assert_eq!(cache.hint_for("a"), None);
    }

    #[test]
    fn hint_uses_fractional_component_of_latest_sample() {
        let cache = DriftCache::new();
        cache.record("a", 12345.0);
        assert_eq!(cache.hint_for("a"), Some(345.0));
    }

    #[test]
    fn caps_history_length() {
        let cache = DriftCache::new();
        for i in 0..20 {
            cache.record("a", i as f64);
        }
        assert_eq!(cache.drift_rate_ms("a"), Some(1.0));
    }
}
