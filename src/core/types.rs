//! Core data types shared across the synchronization engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which [`crate::core::extractor::TimeExtractor`] variant a target uses to
/// turn an HTTP response into a wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractorKind {
    /// Parse the response's `Date` header (RFC-1123/RFC-850/asctime).
    DateHeader,
    /// Consult a configured trusted external time source.
    ExternalFallback,
}

/// A server whose clock is being synchronized against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTarget {
    pub id: String,
    pub url: String,
    pub extractor: ExtractorKind,
    /// Cached `total_offset` from the most recent successful run, consulted
    /// by Phase 2 to seed `offset_hint`.
    #[serde(default)]
    pub cached_offset_ms: Option<f64>,
}

impl ServerTarget {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            extractor: ExtractorKind::DateHeader,
            cached_offset_ms: None,
        }
    }
}

/// A single completed probe: one request/response round trip with
/// monotonic send/receive timestamps and whatever time the extractor could
/// pull out of the response.
#[derive(Debug, Clone)]
pub struct ProbeSample {
    /// Monotonic instant immediately before the request was committed to
    /// the socket, as nanoseconds since an arbitrary process-relative
    /// epoch (see `probe::instant_to_ns`); kept for observability only.
    pub send_monotonic_ns: u64,
    /// Monotonic instant immediately after headers were fully read.
    pub recv_monotonic_ns: u64,
    /// Wall-clock reading (ms since Unix epoch) taken at the same instant
    /// as `send_monotonic_ns`, via `Clock::monotonic_to_wall_ms`. This is
    /// what the binary search compares against the server's own seconds.
    pub send_wall_ms: i64,
    /// `recv_monotonic_ns - send_monotonic_ns`.
    pub rtt: Duration,
    /// Wall-clock instant the extractor recovered from the response, if
    /// any (absent only when the probe failed before extraction).
    pub server_reported_ms: Option<i64>,
    /// Whether response headers carried a recognizable CDN signature
    /// (`cf-ray`, `server: cloudflare`, `x-served-by`, `x-cache`, ...).
    pub cdn_signature: bool,
    /// How far a scheduled send missed its target instant, in
    /// microseconds. Recorded for observability; never used to retry.
    pub schedule_slack_us: i64,
}

/// Five-number summary of a batch of RTTs, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencyProfile {
    pub min_ms: f64,
    pub q1_ms: f64,
    pub median_ms: f64,
    pub q3_ms: f64,
    pub max_ms: f64,
}

impl LatencyProfile {
    /// The inclusive acceptance band `[q1, q3]` used to reject noisy probes
    /// in Phases 2–4.
    pub fn acceptance_band(&self) -> (f64, f64) {
        (self.q1_ms, self.q3_ms)
    }

    pub fn accepts(&self, rtt: Duration) -> bool {
        let ms = rtt.as_secs_f64() * 1000.0;
        ms >= self.q1_ms && ms <= self.q3_ms
    }
}

/// Integer-second offset between server and client clocks, produced by
/// Phase 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WholeOffset(pub i64);

/// Fractional-second offset in `[0, 1)`, produced by Phase 3.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubOffset(pub f64);

/// Which phase a run reached before terminating (successfully or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    LatencyProfiling,
    WholeSecondResolution,
    BinarySearchRefinement,
    Verification,
}

/// Terminal artifact of a completed sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub server_id: String,
    pub whole_offset_seconds: i64,
    pub sub_offset_seconds: f64,
    /// `whole_offset_seconds * 1000 + sub_offset_seconds * 1000`.
    pub total_offset_ms: f64,
    pub latency_profile: LatencyProfile,
    pub verified: bool,
    /// Wall-clock instant (ms since epoch) the run completed.
    pub synced_at_ms: i64,
    pub duration_ms: u64,
    pub phase_reached: Phase,
    /// Which extractor ultimately produced this result. Differs from the
    /// target's configured extractor when Phase 1 hit `MissingTimeSource`
    /// and a fallback source was configured (spec §7/§8 scenario 4).
    #[serde(default = "default_extractor_used")]
    pub extractor_used: ExtractorKind,
    /// Whether any Phase 1 probe carried a recognizable CDN/edge-proxy
    /// signature (spec §4.3's "surface an advisory" requirement). Advisory
    /// only — never used to reject a sample.
    #[serde(default)]
    pub cdn_signature_detected: bool,
}

fn default_extractor_used() -> ExtractorKind {
    ExtractorKind::DateHeader
}

impl SyncResult {
    pub fn total_offset_ms(whole: WholeOffset, sub: SubOffset) -> f64 {
        whole.0 as f64 * 1000.0 + sub.0 * 1000.0
    }
}

/// Per-iteration payload emitted by Phase 3, useful to a progress consumer
/// that wants to render the narrowing interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySearchProgress {
    pub lower: f64,
    pub upper: f64,
    pub width_ms: f64,
    pub iteration: u32,
}

/// Tagged progress stream emitted by the orchestrator while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    Progress {
        phase: Phase,
        percent: f64,
        elapsed_ms: u64,
        binary_search: Option<BinarySearchProgress>,
    },
    Complete(SyncResult),
    Error {
        phase: Option<Phase>,
        message: String,
    },
}
