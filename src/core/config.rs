//! Engine configuration (spec §6 "Configuration options").
//!
//! Mirrors the override order the teacher uses for probe timeouts in
//! `HttpMonitor::calculate_timeout`: an explicit constructor value beats an
//! environment variable, which beats the built-in default.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineParams {
    pub min_request_interval_ms: u64,
    pub phase1_sample_count: u32,
    pub phase3_max_iterations: u32,
    pub phase3_termination_width_ms: f64,
    pub phase4_probe_count: u32,
    pub retry_attempts_per_probe: u32,
    pub per_probe_deadline_ms: u64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            min_request_interval_ms: 500,
            phase1_sample_count: 10,
            phase3_max_iterations: 20,
            phase3_termination_width_ms: 1.0,
            phase4_probe_count: 4,
            retry_attempts_per_probe: 3,
            per_probe_deadline_ms: 5000,
        }
    }
}

impl EngineParams {
    /// Applies `SYNCENGINE_<FIELD>` environment overrides on top of a base
    /// value (typically [`EngineParams::default`]), the same override
    /// layer the teacher applies over its hardcoded mode-based timeouts.
    pub fn with_env_overrides(mut self) -> Self {
        macro_rules! override_u64 {
            ($field:ident, $env:expr) => {
                if let Ok(v) = std::env::var($env).and_then(|s| {
                    s.parse::<u64>()
                        .map_err(|_| std::env::VarError::NotPresent)
                }) {
                    self.$field = v;
                }
            };
        }
        macro_rules! override_u32 {
            ($field:ident, $env:expr) => {
                if let Ok(v) = std::env::var($env).and_then(|s| {
                    s.parse::<u32>()
                        .map_err(|_| std::env::VarError::NotPresent)
                }) {
                    self.$field = v;
                }
            };
        }

        override_u64!(min_request_interval_ms, "SYNCENGINE_MIN_REQUEST_INTERVAL_MS");
        override_u32!(phase1_sample_count, "SYNCENGINE_PHASE1_SAMPLE_COUNT");
        override_u32!(phase3_max_iterations, "SYNCENGINE_PHASE3_MAX_ITERATIONS");
        override_u32!(phase4_probe_count, "SYNCENGINE_PHASE4_PROBE_COUNT");
        override_u32!(retry_attempts_per_probe, "SYNCENGINE_RETRY_ATTEMPTS_PER_PROBE");
        override_u64!(per_probe_deadline_ms, "SYNCENGINE_PER_PROBE_DEADLINE_MS");

        if let Ok(v) = std::env::var("SYNCENGINE_PHASE3_TERMINATION_WIDTH_MS") {
            if let Ok(parsed) = v.parse::<f64>() {
                self.phase3_termination_width_ms = parsed;
            }
        }

        self
    }

    pub fn per_probe_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.per_probe_deadline_ms)
    }

    pub fn min_request_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.min_request_interval_ms)
    }
}

/// Settings the engine requires from its host (spec §6): the minimum keys
/// a collaborator-supplied settings map must carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub min_request_interval_ms: u64,
    pub health_resync_threshold_ms: f64,
    pub external_time_source: Option<String>,
    pub drift_warning_threshold_ms: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_request_interval_ms: 500,
            health_resync_threshold_ms: 50.0,
            external_time_source: None,
            drift_warning_threshold_ms: 20.0,
        }
    }
}
