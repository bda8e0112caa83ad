mod common;

use common::{AlwaysFailTransport, SimulatedServerTransport};
use std::sync::Arc;
use syncengine::core::clock::mock::MockClock;
use syncengine::core::config::EngineParams;
use syncengine::core::drift::DriftCache;
use syncengine::core::error::{ExtractError, ProbeError, SyncError};
use syncengine::core::orchestrator::Engine;
use syncengine::core::probe::mock::MockProbeTransport;
use syncengine::core::probe::HttpProbe;
use syncengine::core::progress::{ChannelProgressSink, NullProgressSink};
use syncengine::core::store::{JsonServerStore, ServerStore};
use syncengine::core::types::{ExtractorKind, Phase, ProgressEvent, ServerTarget};

fn test_params() -> EngineParams {
    EngineParams {
        min_request_interval_ms: 10,
        phase1_sample_count: 8,
        phase3_max_iterations: 20,
        phase3_termination_width_ms: 1.0,
        phase4_probe_count: 4,
        retry_attempts_per_probe: 3,
        per_probe_deadline_ms: 5000,
    }
}

fn new_store() -> Arc<dyn ServerStore> {
    let dir = tempfile::tempdir().unwrap();
    Arc::new(JsonServerStore::new(dir.path().join("store.json")).unwrap())
}

fn target_for(id: &str) -> ServerTarget {
    let mut target = ServerTarget::new(id, "https://example.com");
    target.extractor = ExtractorKind::DateHeader;
    target
}

#[tokio::test]
async fn ideal_lan_offset_converges_and_verifies() {
    let clock = Arc::new(MockClock::new(1_700_000_000_000));
    let transport = Arc::new(SimulatedServerTransport::new(
        clock.clone(),
        237.0,
        vec![10.0, 11.0, 12.0, 13.0, 14.0],
    ));
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let engine = Engine::new(
        probe,
        clock.clone(),
        test_params(),
        new_store(),
        Arc::new(DriftCache::new()),
    );

    let target = target_for("ideal-lan");
    let result = engine
        .start_sync(&target, &NullProgressSink)
        .await
        .expect("sync should succeed");

    assert_eq!(result.whole_offset_seconds, 0);
    assert!(
        (result.total_offset_ms - 237.0).abs() < 5.0,
        "total_offset_ms={}",
        result.total_offset_ms
    );
    assert!(result.verified);
}

#[tokio::test]
async fn multi_second_offset_resolves_whole_seconds() {
    let clock = Arc::new(MockClock::new(1_700_000_000_000));
    let transport = Arc::new(SimulatedServerTransport::new(
        clock.clone(),
        3_742.0,
        vec![10.0, 12.0, 11.0],
    ));
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let engine = Engine::new(
        probe,
        clock.clone(),
        test_params(),
        new_store(),
        Arc::new(DriftCache::new()),
    );

    let target = target_for("multi-second");
    let result = engine
        .start_sync(&target, &NullProgressSink)
        .await
        .expect("sync should succeed");

    assert_eq!(result.whole_offset_seconds, 3);
    assert!(
        (result.sub_offset_seconds - 0.742).abs() < 0.01,
        "sub_offset={}",
        result.sub_offset_seconds
    );
}

#[tokio::test]
async fn utc_midnight_rollover_still_resolves() {
    // 23:59:58.5 UTC on an arbitrary day, server running 600ms ahead so the
    // search straddles the midnight tick.
    let midnight_ms = 1_700_006_398_500; // picked so local + offset crosses a day boundary
    let clock = Arc::new(MockClock::new(midnight_ms));
    let transport = Arc::new(SimulatedServerTransport::new(
        clock.clone(),
        600.0,
        vec![10.0, 11.0, 12.0],
    ));
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let engine = Engine::new(
        probe,
        clock.clone(),
        test_params(),
        new_store(),
        Arc::new(DriftCache::new()),
    );

    let target = target_for("midnight-rollover");
    let result = engine
        .start_sync(&target, &NullProgressSink)
        .await
        .expect("sync should succeed across a second rollover");

    assert!(
        (result.total_offset_ms - 600.0).abs() < 5.0,
        "total_offset_ms={}",
        result.total_offset_ms
    );
}

#[tokio::test]
async fn median_rtt_at_one_second_is_noisy_network() {
    let clock = Arc::new(MockClock::new(1_700_000_000_000));
    let transport = Arc::new(SimulatedServerTransport::new(
        clock.clone(),
        0.0,
        vec![1_000.0, 1_050.0, 1_100.0],
    ));
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let engine = Engine::new(
        probe,
        clock.clone(),
        test_params(),
        new_store(),
        Arc::new(DriftCache::new()),
    );

    let target = target_for("noisy");
    let err = engine
        .start_sync(&target, &NullProgressSink)
        .await
        .expect_err("a 1s median RTT leaves no binary-search budget");

    assert!(matches!(err, SyncError::NoisyNetwork));
}

#[tokio::test]
async fn progress_events_are_ordered_with_one_terminal_event() {
    let clock = Arc::new(MockClock::new(1_700_000_000_000));
    let transport = Arc::new(SimulatedServerTransport::new(
        clock.clone(),
        100.0,
        vec![10.0, 11.0, 12.0],
    ));
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let engine = Engine::new(
        probe,
        clock.clone(),
        test_params(),
        new_store(),
        Arc::new(DriftCache::new()),
    );

    let (sink, rx) = ChannelProgressSink::channel();
    let target = target_for("ordering");
    let result = engine.start_sync(&target, &sink).await;
    assert!(result.is_ok());
    drop(sink);

    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    assert!(!events.is_empty());

    let mut last_elapsed = 0u64;
    let mut terminal_count = 0;
    for (i, event) in events.iter().enumerate() {
        match event {
            ProgressEvent::Progress { elapsed_ms, .. } => {
                assert!(*elapsed_ms >= last_elapsed);
                last_elapsed = *elapsed_ms;
            }
            ProgressEvent::Complete(_) => {
                terminal_count += 1;
                assert_eq!(i, events.len() - 1, "Complete must be the final event");
            }
            ProgressEvent::Error { .. } => {
                terminal_count += 1;
                assert_eq!(i, events.len() - 1, "Error must be the final event");
            }
        }
    }
    assert_eq!(terminal_count, 1);
}

#[tokio::test]
async fn at_most_one_active_run_per_target() {
    let clock: Arc<MockClock> = Arc::new(MockClock::new(1_700_000_000_000));
    let transport = Arc::new(AlwaysFailTransport);
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let params = EngineParams {
        phase1_sample_count: 1,
        retry_attempts_per_probe: 1,
        ..test_params()
    };
    let engine = Arc::new(Engine::new(
        probe,
        clock.clone(),
        params,
        new_store(),
        Arc::new(DriftCache::new()),
    ));

    let target = target_for("busy-target");
    let engine_bg = engine.clone();
    let target_bg = target.clone();
    let handle = tokio::spawn(async move {
        engine_bg.start_sync(&target_bg, &NullProgressSink).await
    });

    tokio::task::yield_now().await;

    let second = engine.start_sync(&target, &NullProgressSink).await;
    assert!(matches!(second, Err(SyncError::AlreadyRunning)));

    let _ = handle.await;
}

#[tokio::test]
async fn cancel_sync_is_idempotent_and_errors_once_finished() {
    let clock = Arc::new(MockClock::new(1_700_000_000_000));
    let transport = Arc::new(AlwaysFailTransport);
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let params = EngineParams {
        phase1_sample_count: 1,
        retry_attempts_per_probe: 1,
        ..test_params()
    };
    let engine = Engine::new(
        probe,
        clock.clone(),
        params,
        new_store(),
        Arc::new(DriftCache::new()),
    );

    let target = target_for("never-started");
    assert!(matches!(
        engine.cancel_sync(&target.id),
        Err(SyncError::NotRunning)
    ));

    let _ = engine.start_sync(&target, &NullProgressSink).await;
    assert!(matches!(
        engine.cancel_sync(&target.id),
        Err(SyncError::NotRunning)
    ));
    assert!(matches!(
        engine.cancel_sync(&target.id),
        Err(SyncError::NotRunning)
    ));
}

#[tokio::test]
async fn noisy_spikes_stay_within_bounded_retries_and_still_verify() {
    let clock = Arc::new(MockClock::new(1_700_000_000_000));
    // Two wide first samples (15, 25) pin Phase 1's own running-acceptance
    // window open; everything in [15, 25] rides through Phase 1 unrejected
    // except the deliberate 500 ms spike. The *final* five-number-summary
    // band computed over all eight accepted samples is tighter ([16.5,
    // 23.5]), so 15/25/500 all get rejected again in Phases 2-4 — at most
    // three consecutive rejections per period of six, comfortably inside a
    // five-attempt retry budget.
    let transport = Arc::new(SimulatedServerTransport::new(
        clock.clone(),
        237.0,
        vec![15.0, 25.0, 18.0, 20.0, 22.0, 500.0],
    ));
    let probe = Arc::new(HttpProbe::new(transport.clone(), clock.clone()));
    let params = EngineParams {
        min_request_interval_ms: 10,
        phase1_sample_count: 8,
        phase3_max_iterations: 20,
        phase3_termination_width_ms: 1.0,
        phase4_probe_count: 4,
        retry_attempts_per_probe: 5,
        per_probe_deadline_ms: 5000,
    };
    let engine = Engine::new(
        probe,
        clock.clone(),
        params,
        new_store(),
        Arc::new(DriftCache::new()),
    );

    let target = target_for("noisy-spikes");
    let result = engine
        .start_sync(&target, &NullProgressSink)
        .await
        .expect("bounded retries should carry a noisy run to completion");

    assert!(result.verified);
    assert!(
        (result.total_offset_ms - 237.0).abs() < 10.0,
        "total_offset_ms={}",
        result.total_offset_ms
    );

    // Every probe slot across all four phases is bounded by
    // `retry_attempts_per_probe`; this is the guarantee the Phase-3 retry
    // cap (every rejection counts against the budget, not just anomalous
    // arithmetic) exists to uphold.
    let max_probe_slots = params.phase1_sample_count as usize
        + 1
        + params.phase3_max_iterations as usize
        + params.phase4_probe_count as usize;
    let bound = max_probe_slots * params.retry_attempts_per_probe as usize;
    assert!(
        transport.call_count() < bound,
        "call_count={} bound={}",
        transport.call_count(),
        bound
    );
}

#[tokio::test]
async fn missing_date_with_no_fallback_fails_in_phase_one() {
    let clock = Arc::new(MockClock::new(1_700_000_000_000));
    let transport = Arc::new(MockProbeTransport::new());
    transport.push_error(ProbeError::Extract(ExtractError::MissingTimeSource));
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let params = EngineParams {
        phase1_sample_count: 4,
        retry_attempts_per_probe: 3,
        ..test_params()
    };
    // No `EngineSettings::external_time_source` configured: there is
    // nowhere for the orchestrator to fall back to.
    let engine = Engine::new(
        probe,
        clock.clone(),
        params,
        new_store(),
        Arc::new(DriftCache::new()),
    );

    let target = target_for("no-date-no-fallback");
    let err = engine
        .start_sync(&target, &NullProgressSink)
        .await
        .expect_err("a missing Date header with no fallback source must fail Phase 1");

    assert!(matches!(
        err,
        SyncError::Probe(ProbeError::Extract(ExtractError::MissingTimeSource))
    ));
    assert_eq!(err.phase_reached(), Some(Phase::LatencyProfiling));
}

#[tokio::test]
async fn boundary_hazard_fails_after_retries_exhausted() {
    let clock = Arc::new(MockClock::new(1_700_000_000_000));
    let transport = Arc::new(SimulatedServerTransport::new(
        clock.clone(),
        0.0,
        vec![10.0, 11.0, 12.0],
    ));
    let probe = Arc::new(HttpProbe::new(transport, clock.clone()));
    let params = EngineParams {
        min_request_interval_ms: 10,
        phase1_sample_count: 4,
        retry_attempts_per_probe: 3,
        ..test_params()
    };
    let engine = Engine::new(
        probe,
        clock.clone(),
        params,
        new_store(),
        Arc::new(DriftCache::new()),
    );

    // Phase 2 always aims for the middle of a local second; seeding a
    // cached offset hint of -499.5 ms drags that predicted instant to
    // within half a millisecond of the *next* second-tick boundary, and
    // that residue is unaffected by Phase 2's per-retry one-second skip.
    // Every attempt lands in the hazard window, so the phase must exhaust
    // its retry budget and fail rather than resolve a bogus whole-second
    // offset.
    let mut target = target_for("boundary-hazard");
    target.cached_offset_ms = Some(-499.5);

    let err = engine
        .start_sync(&target, &NullProgressSink)
        .await
        .expect_err("a predicted instant stuck in the hazard window must fail Phase 2");

    assert!(matches!(err, SyncError::AmbiguousBoundary));
    assert_eq!(err.phase_reached(), Some(Phase::WholeSecondResolution));
}
