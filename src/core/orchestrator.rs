//! Engine Orchestrator (spec §4.8): runs the four phases in order for a
//! target, emitting progress and enforcing "at most one active run per
//! target".

use crate::core::clock::Clock;
use crate::core::config::{EngineParams, EngineSettings};
use crate::core::drift::DriftCache;
use crate::core::error::{ExtractError, ProbeError, SyncError};
use crate::core::extractor::{extractor_for, ExternalFallbackExtractor};
use crate::core::logger::SyncLogger;
use crate::core::phases::binary::BinarySearchRefiner;
use crate::core::phases::latency::LatencyProfiler;
use crate::core::phases::verify::Verifier;
use crate::core::phases::whole::WholeSecondResolver;
use crate::core::probe::HttpProbe;
use crate::core::progress::{CancelToken, ProgressSink};
use crate::core::store::ServerStore;
use crate::core::types::{ExtractorKind, Phase, ProgressEvent, ServerTarget, SyncResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub struct Engine {
    probe: Arc<HttpProbe>,
    clock: Arc<dyn Clock>,
    params: EngineParams,
    settings: EngineSettings,
    store: Arc<dyn ServerStore>,
    drift: Arc<DriftCache>,
    logger: Option<Arc<SyncLogger>>,
    active_runs: Mutex<HashMap<String, CancelToken>>,
}

impl Engine {
    pub fn new(
        probe: Arc<HttpProbe>,
        clock: Arc<dyn Clock>,
        params: EngineParams,
        store: Arc<dyn ServerStore>,
        drift: Arc<DriftCache>,
    ) -> Self {
        Self::with_settings(probe, clock, params, EngineSettings::default(), store, drift)
    }

    pub fn with_settings(
        probe: Arc<HttpProbe>,
        clock: Arc<dyn Clock>,
        params: EngineParams,
        settings: EngineSettings,
        store: Arc<dyn ServerStore>,
        drift: Arc<DriftCache>,
    ) -> Self {
        Self {
            probe,
            clock,
            params,
            settings,
            store,
            drift,
            logger: None,
            active_runs: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches a [`SyncLogger`] so run/phase/retry events are recorded
    /// alongside the progress channel. Optional — a caller that doesn't
    /// need the debug log (tests, embedders without a log sink) simply
    /// never calls this.
    pub fn with_logger(mut self, logger: Arc<SyncLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Requests cancellation of the active run for `server_id`, if any.
    /// Idempotent: cancelling twice, or a run that has already finished,
    /// is not an error as long as one was active at some point.
    pub fn cancel_sync(&self, server_id: &str) -> Result<(), SyncError> {
        let runs = self.active_runs.lock().unwrap();
        match runs.get(server_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(SyncError::NotRunning),
        }
    }

    pub async fn start_sync(
        &self,
        target: &ServerTarget,
        progress: &dyn ProgressSink,
    ) -> Result<SyncResult, SyncError> {
        let cancel = {
            let mut runs = self.active_runs.lock().unwrap();
            if runs.contains_key(&target.id) {
                return Err(SyncError::AlreadyRunning);
            }
            let token = CancelToken::new();
            runs.insert(target.id.clone(), token.clone());
            token
        };

        if let Some(logger) = &self.logger {
            logger.run_start(&target.id, &target.url);
        }

        let result = self.run_phases(target, &cancel, progress).await;

        self.active_runs.lock().unwrap().remove(&target.id);

        match &result {
            Ok(sync_result) => {
                progress.send(ProgressEvent::Complete(sync_result.clone()));
                self.store.append_result(&target.id, sync_result.clone());
                self.drift
                    .record(&target.id, sync_result.total_offset_ms);
            }
            Err(err) => {
                progress.send(ProgressEvent::Error {
                    phase: err.phase_reached(),
                    message: err.to_string(),
                });
                if let Some(logger) = &self.logger {
                    logger.run_error(&err.to_string());
                }
            }
        }

        result
    }

    async fn run_phases(
        &self,
        target: &ServerTarget,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<SyncResult, SyncError> {
        let run_start = Instant::now();
        let mut extractor = extractor_for(target.extractor);
        let mut extractor_used = target.extractor;

        let latency = LatencyProfiler::new(self.probe.clone(), self.clock.clone(), self.params);
        let (profile, samples) = match latency
            .run(&target.url, extractor.as_ref(), cancel, progress, run_start)
            .await
        {
            Ok(result) => result,
            // Structural "no Date at all" failure: if an external fallback
            // source is configured, swap extractors once and restart Phase
            // 1 on it rather than failing the whole run (spec §7/§8
            // scenario 4). A second failure on the fallback itself is
            // fatal — there is nowhere else to fall back to.
            Err(SyncError::Probe(ProbeError::Extract(ExtractError::MissingTimeSource)))
                if self.settings.external_time_source.is_some() =>
            {
                if let Some(logger) = &self.logger {
                    logger.probe_retry(
                        "latency_profiling",
                        "missing_time_source, swapping to external fallback extractor",
                    );
                }
                let fallback_clock = self.clock.clone();
                extractor = Box::new(ExternalFallbackExtractor::new(move || {
                    Ok(fallback_clock.now_wall_ms())
                }));
                extractor_used = ExtractorKind::ExternalFallback;
                latency
                    .run(&target.url, extractor.as_ref(), cancel, progress, run_start)
                    .await?
            }
            Err(err) => return Err(err),
        };
        let cdn_signature_detected = samples.iter().any(|s| s.cdn_signature);
        if cdn_signature_detected {
            if let Some(logger) = &self.logger {
                logger.cdn_signature_detected(&target.id);
            }
        }
        if let Some(logger) = &self.logger {
            logger.phase_complete("latency_profiling", run_start.elapsed().as_millis() as u64);
        }

        let offset_hint_ms = target
            .cached_offset_ms
            .or_else(|| self.drift.hint_for(&target.id))
            .unwrap_or(0.0);

        let whole = WholeSecondResolver::new(self.probe.clone(), self.clock.clone(), self.params);
        let (whole_offset, seed) = whole
            .run(
                &target.url,
                extractor.as_ref(),
                &profile,
                offset_hint_ms,
                cancel,
                progress,
                run_start,
            )
            .await?;
        if let Some(logger) = &self.logger {
            logger.phase_complete(
                "whole_second_resolution",
                run_start.elapsed().as_millis() as u64,
            );
        }

        let binary = BinarySearchRefiner::new(self.probe.clone(), self.clock.clone(), self.params);
        let sub_offset = binary
            .run(
                &target.url,
                extractor.as_ref(),
                &profile,
                &seed,
                cancel,
                progress,
                run_start,
            )
            .await?;
        if let Some(logger) = &self.logger {
            logger.phase_complete(
                "binary_search_refinement",
                run_start.elapsed().as_millis() as u64,
            );
        }

        let total_offset_ms = SyncResult::total_offset_ms(whole_offset, sub_offset);

        let verifier = Verifier::new(self.probe.clone(), self.clock.clone(), self.params);
        let verified = verifier
            .run(
                &target.url,
                extractor.as_ref(),
                &profile,
                total_offset_ms,
                cancel,
                progress,
                run_start,
            )
            .await?;
        if let Some(logger) = &self.logger {
            logger.phase_complete("verification", run_start.elapsed().as_millis() as u64);
        }

        Ok(SyncResult {
            server_id: target.id.clone(),
            whole_offset_seconds: whole_offset.0,
            sub_offset_seconds: sub_offset.0,
            total_offset_ms,
            latency_profile: profile,
            verified,
            synced_at_ms: self.clock.now_wall_ms(),
            duration_ms: run_start.elapsed().as_millis() as u64,
            phase_reached: Phase::Verification,
            extractor_used,
            cdn_signature_detected,
        })
    }
}
