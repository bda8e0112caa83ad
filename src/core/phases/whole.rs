//! Whole-Second Resolver (spec §4.5, Phase 2): lands one probe near the
//! middle of a local second and reads off the integer-second offset.

use crate::core::clock::Clock;
use crate::core::config::EngineParams;
use crate::core::error::{ProbeError, SyncError};
use crate::core::extractor::TimeExtractor;
use crate::core::probe::HttpProbe;
use crate::core::progress::{CancelToken, ProgressSink};
use crate::core::types::{LatencyProfile, Phase, ProbeSample, ProgressEvent, WholeOffset};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct WholeSecondResolver {
    probe: Arc<HttpProbe>,
    clock: Arc<dyn Clock>,
    params: EngineParams,
}

impl WholeSecondResolver {
    pub fn new(probe: Arc<HttpProbe>, clock: Arc<dyn Clock>, params: EngineParams) -> Self {
        Self {
            probe,
            clock,
            params,
        }
    }

    /// `offset_hint_ms` initializes from the target's cached offset if any,
    /// else 0 (spec §9 Design Notes resolves this as the default when no
    /// prior run exists).
    pub async fn run(
        &self,
        url: &str,
        extractor: &dyn TimeExtractor,
        profile: &LatencyProfile,
        offset_hint_ms: f64,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
        run_start: Instant,
    ) -> Result<(WholeOffset, ProbeSample), SyncError> {
        let median_rtt_ms = profile.median_ms;
        let jitter_ms = (profile.q3_ms - profile.q1_ms) / 2.0;
        let hazard_threshold_ms = jitter_ms.max(5.0);

        let mut last_send: Option<Instant> = None;

        for attempt in 0..self.params.retry_attempts_per_probe {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if let Some(last) = last_send {
                self.clock
                    .sleep_until(last + self.params.min_request_interval())
                    .await;
            }

            // Skip ahead one extra second on retries so the chosen arrival
            // point doesn't collide with the one that just failed.
            let skip_seconds = attempt as i64;
            let (send_target, predicted_server_ms) =
                self.plan_send(median_rtt_ms, offset_hint_ms, skip_seconds);

            let distance = distance_to_boundary(predicted_server_ms);
            if distance < hazard_threshold_ms
                && attempt + 1 == self.params.retry_attempts_per_probe
            {
                return Err(SyncError::AmbiguousBoundary);
            }
            if distance < hazard_threshold_ms {
                last_send = Some(self.clock.now_monotonic());
                continue;
            }

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
                Err(_) => continue,
            };

            if !profile.accepts(sample.rtt) {
                continue;
            }

            let server_reported_ms = match sample.server_reported_ms {
                Some(ms) => ms,
                None => continue,
            };

            let whole_offset =
                ((server_reported_ms as f64 - predicted_server_ms) / 1000.0).floor() as i64;

            progress.send(ProgressEvent::Progress {
                phase: Phase::WholeSecondResolution,
                percent: 50.0,
                elapsed_ms: run_start.elapsed().as_millis() as u64,
                binary_search: None,
            });

            return Ok((WholeOffset(whole_offset), sample));
        }

        Err(SyncError::AmbiguousBoundary)
    }

    /// Computes the monotonic instant to send at, and the wall-clock
    /// instant (ms) that send is predicted to land at on the server, given
    /// the current offset hint.
    fn plan_send(
        &self,
        median_rtt_ms: f64,
        offset_hint_ms: f64,
        skip_seconds: i64,
    ) -> (Instant, f64) {
        let sample = self.clock.sample();
        let wall_ms = sample.wall_ms as f64;
        let current_second_start = (sample.wall_ms - sample.wall_ms.rem_euclid(1000)) as f64;

        let mut mid_target_ms =
            current_second_start + 500.0 + offset_hint_ms + (skip_seconds as f64) * 1000.0;
        if mid_target_ms <= wall_ms {
            mid_target_ms += 1000.0;
        }

        let delta_ms = mid_target_ms - wall_ms;
        let send_target = sample.monotonic + duration_from_ms(delta_ms - median_rtt_ms / 2.0);
        let predicted_server_ms = wall_ms + delta_ms - median_rtt_ms / 2.0 + median_rtt_ms / 2.0;

        (send_target, predicted_server_ms)
    }
}

fn duration_from_ms(ms: f64) -> Duration {
    if ms <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(ms / 1000.0)
    }
}

fn distance_to_boundary(wall_ms: f64) -> f64 {
    let frac = wall_ms.rem_euclid(1000.0);
    frac.min(1000.0 - frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_boundary_is_symmetric() {
        assert_eq!(distance_to_boundary(100.0), 100.0);
        assert_eq!(distance_to_boundary(900.0), 100.0);
        assert_eq!(distance_to_boundary(500.0), 500.0);
        assert_eq!(distance_to_boundary(0.0), 0.0);
    }
}
