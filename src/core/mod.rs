pub mod clock;
pub mod config;
pub mod drift;
pub mod error;
pub mod extractor;
pub mod logger;
pub mod orchestrator;
pub mod phases;
pub mod probe;
pub mod progress;
pub mod store;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use config::{EngineParams, EngineSettings};
pub use drift::DriftCache;
pub use error::{ExtractError, ProbeError, StoreError, SyncError};
pub use extractor::{extractor_for, DateHeaderExtractor, ExternalFallbackExtractor, TimeExtractor};
pub use logger::SyncLogger;
pub use orchestrator::Engine;
pub use probe::{HttpProbe, ProbeTransport};
pub use progress::{CancelToken, ChannelProgressSink, NullProgressSink, ProgressSink};
pub use store::{JsonServerStore, ServerStore};
pub use types::{
    ExtractorKind, LatencyProfile, Phase, ProgressEvent, ServerTarget, SubOffset, SyncResult,
    WholeOffset,
};

#[cfg(feature = "network-monitoring")]
pub use probe::IsahcProbeTransport;
