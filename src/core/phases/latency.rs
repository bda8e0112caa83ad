//! Latency Profiler (spec §4.4, Phase 1): samples N RTTs, computes the
//! five-number summary, and rejects outliers as they arrive.

use crate::core::clock::Clock;
use crate::core::config::EngineParams;
use crate::core::error::{ExtractError, ProbeError, SyncError};
use crate::core::extractor::TimeExtractor;
use crate::core::probe::HttpProbe;
use crate::core::progress::{CancelToken, ProgressSink};
use crate::core::types::{LatencyProfile, Phase, ProbeSample, ProgressEvent};
use std::sync::Arc;
use std::time::Instant;

pub struct LatencyProfiler {
    probe: Arc<HttpProbe>,
    clock: Arc<dyn Clock>,
    params: EngineParams,
}

impl LatencyProfiler {
    pub fn new(probe: Arc<HttpProbe>, clock: Arc<dyn Clock>, params: EngineParams) -> Self {
        Self {
            probe,
            clock,
            params,
        }
    }

    pub async fn run(
        &self,
        url: &str,
        extractor: &dyn TimeExtractor,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
        run_start: Instant,
    ) -> Result<(LatencyProfile, Vec<ProbeSample>), SyncError> {
        let n = self.params.phase1_sample_count as usize;
        let mut accepted: Vec<ProbeSample> = Vec::with_capacity(n);
        let mut last_send: Option<Instant> = None;

        for i in 0..n {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mut slot_result = None;
            for _attempt in 0..self.params.retry_attempts_per_probe {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }

                self.wait_for_interval(last_send).await;
                last_send = Some(self.clock.now_monotonic());

                match self
                    .probe
                    .probe(url, extractor, self.params.per_probe_deadline(), cancel)
                    .await
                {
                    Ok(sample) => {
                        // The very first probe often includes a fresh
                        // handshake; nothing to compare it against yet, so
                        // accept unconditionally. From the third sample on,
                        // reject anything outside the running [min, max].
                        if accepted.len() < 2 || within_running_band(&accepted, sample.rtt) {
                            slot_result = Some(sample);
                            break;
                        }
                    }
                    Err(ProbeError::Cancelled) => return Err(SyncError::Cancelled),
                    // A response with no `Date` at all and no other time
                    // source is a structural problem, not transient noise:
                    // fail the run after this one probe rather than burning
                    // the remaining retry budget on it (spec §7/§8
                    // scenario 4). The orchestrator decides whether a
                    // fallback extractor is available and worth a restart.
                    Err(ProbeError::Extract(ExtractError::MissingTimeSource)) => {
                        return Err(SyncError::Probe(ProbeError::Extract(
                            ExtractError::MissingTimeSource,
                        )))
                    }
                    Err(_) => continue,
                }
            }

            match slot_result {
                Some(sample) => accepted.push(sample),
                None => return Err(SyncError::NoisyNetwork),
            }

            progress.send(ProgressEvent::Progress {
                phase: Phase::LatencyProfiling,
                percent: percent_complete(i + 1, n),
                elapsed_ms: run_start.elapsed().as_millis() as u64,
                binary_search: None,
            });
        }

        if accepted.len() < n {
            return Err(SyncError::NoisyNetwork);
        }

        let rtts_ms: Vec<f64> = accepted
            .iter()
            .map(|s| s.rtt.as_secs_f64() * 1000.0)
            .collect();
        let profile = five_number_summary(&rtts_ms);

        // Half the median RTT is the margin Phase 3 has to land inside the
        // second-tick boundary; at a 1s median there's no budget left for
        // the binary search to resolve anything (spec §8 boundary
        // behaviour).
        if profile.median_ms >= 1000.0 {
            return Err(SyncError::NoisyNetwork);
        }

        Ok((profile, accepted))
    }

    async fn wait_for_interval(&self, last_send: Option<Instant>) {
        if let Some(last) = last_send {
            let target = last + self.params.min_request_interval();
            self.clock.sleep_until(target).await;
        }
    }
}

fn percent_complete(done: usize, total: usize) -> f64 {
    const PHASE_WEIGHT: f64 = 25.0;
    (done as f64 / total as f64) * PHASE_WEIGHT
}

fn within_running_band(accepted: &[ProbeSample], rtt: std::time::Duration) -> bool {
    let ms: Vec<f64> = accepted
        .iter()
        .map(|s| s.rtt.as_secs_f64() * 1000.0)
        .collect();
    let profile = five_number_summary(&ms);
    let candidate = rtt.as_secs_f64() * 1000.0;
    candidate >= profile.min_ms && candidate <= profile.max_ms
}

/// Computes min/Q1/median/Q3/max using the nearest-rank-free method spec
/// §3 requires: Q1/Q3 are the median of the lower/upper half, each half
/// including the overall median when `n` is odd.
pub fn five_number_summary(values_ms: &[f64]) -> LatencyProfile {
    let mut sorted: Vec<f64> = values_ms.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();

    let median = median_of(&sorted);
    let (lower, upper) = if n % 2 == 0 {
        (&sorted[0..n / 2], &sorted[n / 2..])
    } else {
        (&sorted[0..=n / 2], &sorted[n / 2..])
    };

    LatencyProfile {
        min_ms: sorted[0],
        q1_ms: median_of(lower),
        median_ms: median,
        q3_ms: median_of(upper),
        max_ms: sorted[n - 1],
    }
}

fn median_of(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_number_summary_odd_count() {
        let profile = five_number_summary(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(profile.min_ms, 10.0);
        assert_eq!(profile.median_ms, 30.0);
        assert_eq!(profile.max_ms, 50.0);
        assert_eq!(profile.q1_ms, 20.0);
        assert_eq!(profile.q3_ms, 40.0);
    }

    #[test]
    fn five_number_summary_even_count() {
        let profile = five_number_summary(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(profile.median_ms, 25.0);
        assert_eq!(profile.q1_ms, 15.0);
        assert_eq!(profile.q3_ms, 35.0);
    }

    #[test]
    fn invariant_ordering_holds() {
        let profile = five_number_summary(&[5.0, 1.0, 9.0, 3.0, 7.0, 2.0, 8.0]);
        assert!(profile.min_ms <= profile.q1_ms);
        assert!(profile.q1_ms <= profile.median_ms);
        assert!(profile.median_ms <= profile.q3_ms);
        assert!(profile.q3_ms <= profile.max_ms);
    }
}
