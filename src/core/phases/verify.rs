//! Verifier (spec §4.7, Phase 4): confirms the combined offset by
//! predicting `Date` values half a second on either side of a boundary.

use crate::core::clock::Clock;
use crate::core::config::EngineParams;
use crate::core::error::{ProbeError, SyncError};
use crate::core::extractor::TimeExtractor;
use crate::core::probe::HttpProbe;
use crate::core::progress::{CancelToken, ProgressSink};
use crate::core::types::{LatencyProfile, Phase, ProgressEvent};
use std::sync::Arc;
use std::time::Instant;

pub struct Verifier {
    probe: Arc<HttpProbe>,
    clock: Arc<dyn Clock>,
    params: EngineParams,
}

impl Verifier {
    pub fn new(probe: Arc<HttpProbe>, clock: Arc<dyn Clock>, params: EngineParams) -> Self {
        Self {
            probe,
            clock,
            params,
        }
    }

    /// Returns `true` if every verification probe's observed `Date` second
    /// matched its prediction.
    pub async fn run(
        &self,
        url: &str,
        extractor: &dyn TimeExtractor,
        profile: &LatencyProfile,
        total_offset_ms: f64,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
        run_start: Instant,
    ) -> Result<bool, SyncError> {
        let probe_count = self.params.phase4_probe_count.max(2);
        let half = probe_count / 2;
        let median_rtt_ms = profile.median_ms;

        let now = self.clock.sample();
        let current_server_ms = now.wall_ms as f64 + total_offset_ms;
        // Pick the next full server-second boundary with enough headroom
        // that all 2*half probes fit before it without violating the
        // minimum send interval.
        let headroom_ms = self.params.min_request_interval_ms as f64 * probe_count as f64;
        let boundary_server_ms =
            ((current_server_ms + headroom_ms) / 1000.0).ceil() * 1000.0;

        let mut all_matched = true;
        let mut last_send: Option<Instant> = None;

        for i in 0..probe_count {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let before_boundary = i < half;
            let target_server_ms = if before_boundary {
                boundary_server_ms - 500.0
            } else {
                boundary_server_ms + 500.0
            };
            let expected_second = if before_boundary {
                (boundary_server_ms / 1000.0) as i64 - 1
            } else {
                (boundary_server_ms / 1000.0) as i64
            };

            if let Some(last) = last_send {
                self.clock
                    .sleep_until(last + self.params.min_request_interval())
                    .await;
            }

            let target_local_wall_ms = target_server_ms - total_offset_ms;
            let send_target =
                self.plan_send(target_local_wall_ms, median_rtt_ms);
            last_send = Some(self.clock.now_monotonic());

            let sample = match self
                .probe
                .probe_scheduled(
                    url,
                    extractor,
                    send_target,
                    self.params.per_probe_deadline(),
                    cancel,
                )
                .await
            {
                Ok(s) => s,
                Err(ProbeError::Cancelled) => return Err(SyncError::Cancelled),
                Err(_) => {
                    all_matched = false;
                    continue;
                }
            };

            match sample.server_reported_ms {
                Some(ms) if ms / 1000 == expected_second => {}
                _ => all_matched = false,
            }

            progress.send(ProgressEvent::Progress {
                phase: Phase::Verification,
                percent: 85.0 + 15.0 * ((i + 1) as f64 / probe_count as f64),
                elapsed_ms: run_start.elapsed().as_millis() as u64,
                binary_search: None,
            });
        }

        Ok(all_matched)
    }

    fn plan_send(&self, target_local_wall_ms: f64, median_rtt_ms: f64) -> Instant {
        let sample = self.clock.sample();
        let delta_ms = target_local_wall_ms - sample.wall_ms as f64 - median_rtt_ms / 2.0;
        sample.monotonic + std::time::Duration::from_secs_f64(delta_ms.max(0.0) / 1000.0)
    }
}
