//! HTTP Probe (spec §4.2): issues one request, times it on the monotonic
//! clock, and hands the response to a [`TimeExtractor`].

use crate::core::clock::Clock;
use crate::core::error::ProbeError;
use crate::core::extractor::{detect_cdn_signature, ExtractorInput, TimeExtractor};
use crate::core::progress::CancelToken;
use crate::core::types::ProbeSample;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The bytes and metadata a single probe transport call produced.
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Round-trip time measured by the transport itself, as close to the
    /// wire as the transport can get — from immediately before the request
    /// is committed to the socket to immediately after response headers
    /// are fully read. The body, if any, is drained afterward and never
    /// counted.
    pub rtt: Duration,
}

/// Transport abstraction for dependency injection and testing, mirroring
/// the teacher's `HttpClientTrait` split between a real network client and
/// a scripted mock.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn send(&self, url: &str, deadline: Duration) -> Result<RawResponse, ProbeError>;
}

/// Production transport using isahc, reusing a single warm connection
/// across a run the way the teacher's `IsahcHttpClient` does.
#[cfg(feature = "network-monitoring")]
pub struct IsahcProbeTransport {
    client: isahc::HttpClient,
}

#[cfg(feature = "network-monitoring")]
impl IsahcProbeTransport {
    pub fn new() -> Result<Self, ProbeError> {
        let client = isahc::HttpClient::builder()
            .cookies()
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "network-monitoring")]
#[async_trait]
impl ProbeTransport for IsahcProbeTransport {
    async fn send(&self, url: &str, deadline: Duration) -> Result<RawResponse, ProbeError> {
        use futures::io::{copy, sink};
        use isahc::config::Configurable;
        use isahc::Request;

        let request = Request::head(url)
            .timeout(deadline)
            .body(())
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        let start = Instant::now();
        let response = self
            .client
            .send_async(request)
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        let rtt = start.elapsed();

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value_str) = value.to_str() {
                headers.insert(name.to_string(), value_str.to_string());
            }
        }

        let mut body = response.into_body();
        let _ = copy(&mut body, &mut sink()).await;

        if !(200..300).contains(&status) {
            return Err(ProbeError::BadResponse(format!(
                "unexpected status {status}"
            )));
        }

        Ok(RawResponse {
            status,
            headers,
            body: Vec::new(),
            rtt,
        })
    }
}

/// Issues probes against a [`ServerTarget`](crate::core::types::ServerTarget)
/// and converts them into [`ProbeSample`]s.
pub struct HttpProbe {
    transport: Arc<dyn ProbeTransport>,
    clock: Arc<dyn Clock>,
}

impl HttpProbe {
    pub fn new(transport: Arc<dyn ProbeTransport>, clock: Arc<dyn Clock>) -> Self {
        Self { transport, clock }
    }

    /// Sends a single probe immediately (used by Phase 1, which has no
    /// scheduling target). `send_monotonic` is taken right before handing
    /// off to the transport; `recv_monotonic` is derived from the
    /// transport's own RTT measurement rather than a second clock read
    /// after the await, which would add scheduling jitter on top of the
    /// thing we're trying to measure.
    pub async fn probe(
        &self,
        url: &str,
        extractor: &dyn TimeExtractor,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<ProbeSample, ProbeError> {
        if cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let send_monotonic = self.clock.now_monotonic();
        let send_wall_ms = self.clock.monotonic_to_wall_ms(send_monotonic);
        let raw = self.transport.send(url, deadline).await?;
        let recv_monotonic = send_monotonic + raw.rtt;

        if cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let server_reported_ms = extractor
            .extract(&ExtractorInput {
                headers: &raw.headers,
                body: &raw.body,
            })
            .map_err(ProbeError::from)?;

        Ok(ProbeSample {
            send_monotonic_ns: instant_to_ns(send_monotonic),
            recv_monotonic_ns: instant_to_ns(recv_monotonic),
            send_wall_ms,
            rtt: raw.rtt,
            server_reported_ms: Some(server_reported_ms),
            cdn_signature: detect_cdn_signature(&raw.headers),
            schedule_slack_us: 0,
        })
    }

    /// Blocks until `target`, then probes; used by Phases 2–4 to land a
    /// send as close as possible to a chosen local instant.
    pub async fn probe_scheduled(
        &self,
        url: &str,
        extractor: &dyn TimeExtractor,
        target: Instant,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<ProbeSample, ProbeError> {
        if cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        let slack_us = self.clock.sleep_until(target).await;
        let mut sample = self.probe(url, extractor, deadline, cancel).await?;
        sample.schedule_slack_us = slack_us;
        Ok(sample)
    }
}

fn instant_to_ns(instant: Instant) -> u64 {
    // Instant has no stable epoch; we only ever compare instants produced
    // by the same process, so an arbitrary monotonic reference point
    // (process start) is sufficient and avoids pulling in a platform clock
    // API just for this conversion.
    static REFERENCE: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let reference = *REFERENCE.get_or_init(Instant::now);
    instant
        .checked_duration_since(reference)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// In-memory transport for tests: answers a scripted sequence of
/// `(headers, body, rtt)` tuples, mirroring the teacher's
/// `TestHttpClient` route-based mock.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    pub struct MockProbeTransport {
        responses: Mutex<std::collections::VecDeque<Result<RawResponse, ProbeError>>>,
    }

    impl MockProbeTransport {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(std::collections::VecDeque::new()),
            }
        }

        pub fn push_date_header(&self, date: &str, rtt: Duration) {
            let mut headers = HashMap::new();
            headers.insert("Date".to_string(), date.to_string());
            self.responses.lock().unwrap().push_back(Ok(RawResponse {
                status: 200,
                headers,
                body: Vec::new(),
                rtt,
            }));
        }

        pub fn push_error(&self, err: ProbeError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }
    }

    impl Default for MockProbeTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProbeTransport for MockProbeTransport {
        async fn send(&self, _url: &str, _deadline: Duration) -> Result<RawResponse, ProbeError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProbeError::Transport("mock exhausted".to_string())))
        }
    }
}
