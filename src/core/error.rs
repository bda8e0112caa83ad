//! Error taxonomy for the synchronization engine (spec §7).

use crate::core::types::Phase;
use thiserror::Error;

/// Failure of a single probe: transport, timeout, or malformed response.
/// Retried locally by the owning phase up to `retry_attempts_per_probe`
/// times before it is escalated.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("probe exceeded its deadline")]
    Timeout,

    #[error("malformed or non-2xx response: {0}")]
    BadResponse(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("run was cancelled")]
    Cancelled,
}

/// Failure to recover a wall-clock instant from a response.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no usable time source in response")]
    MissingTimeSource,

    #[error("Date header present but unparsable: {0}")]
    UnparsableDate(String),

    #[error("Date header carries a non-UTC/GMT timezone: {0}")]
    NonUtcTimezone(String),
}

/// Terminal failure of a whole sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("phase 1 could not establish a clean latency profile after retries")]
    NoisyNetwork,

    #[error("phase 2 predicted instant fell within the second-boundary hazard window")]
    AmbiguousBoundary,

    #[error("phase 3 observed inconsistent elapsed-second arithmetic after retries")]
    UnstableBoundary,

    #[error("run was cancelled")]
    Cancelled,

    #[error("a sync run is already active for this target")]
    AlreadyRunning,

    #[error("no sync run is active for this target")]
    NotRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Highest phase the run reached before this error terminated it, for
    /// callers that want to report partial progress.
    pub fn phase_reached(&self) -> Option<Phase> {
        match self {
            SyncError::NoisyNetwork => Some(Phase::LatencyProfiling),
            SyncError::Probe(ProbeError::Extract(ExtractError::MissingTimeSource)) => {
                Some(Phase::LatencyProfiling)
            }
            SyncError::AmbiguousBoundary => Some(Phase::WholeSecondResolution),
            SyncError::UnstableBoundary => Some(Phase::BinarySearchRefinement),
            _ => None,
        }
    }
}

/// Collaborator-store failure (persistence, not engine logic).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no server with id {0}")]
    NotFound(String),
}
