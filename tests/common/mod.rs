//! Shared test harness: a reactive simulated-server transport driving the
//! engine's [`MockClock`] forward by half the simulated RTT on each side of
//! a probe, the way a real network round trip would.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use syncengine::core::clock::mock::MockClock;
use syncengine::core::error::ProbeError;
use syncengine::core::probe::{ProbeTransport, RawResponse};

pub fn http_date(wall_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(wall_ms)
        .expect("valid timestamp")
        .to_rfc2822()
}

/// Answers every probe with the clock's current wall time plus a fixed
/// offset, advancing the shared [`MockClock`] by the simulated RTT split
/// evenly across the simulated request and response legs.
pub struct SimulatedServerTransport {
    clock: Arc<MockClock>,
    offset_ms: Mutex<f64>,
    rtts_ms: Vec<f64>,
    calls: AtomicUsize,
}

impl SimulatedServerTransport {
    pub fn new(clock: Arc<MockClock>, offset_ms: f64, rtts_ms: Vec<f64>) -> Self {
        Self {
            clock,
            offset_ms: Mutex::new(offset_ms),
            rtts_ms,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_offset_ms(&self, offset_ms: f64) {
        *self.offset_ms.lock().unwrap() = offset_ms;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProbeTransport for SimulatedServerTransport {
    async fn send(&self, _url: &str, _deadline: Duration) -> Result<RawResponse, ProbeError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let rtt_ms = self.rtts_ms[idx % self.rtts_ms.len()];
        let half = Duration::from_secs_f64(rtt_ms / 2.0 / 1000.0);

        self.clock.advance(half);
        let server_ms = self.clock.now_wall_ms() as f64 + *self.offset_ms.lock().unwrap();
        let mut headers = HashMap::new();
        headers.insert("Date".to_string(), http_date(server_ms as i64));
        self.clock.advance(half);

        Ok(RawResponse {
            status: 200,
            headers,
            body: Vec::new(),
            rtt: Duration::from_secs_f64(rtt_ms / 1000.0),
        })
    }
}

/// A transport every probe fails against, for cases that only need the
/// engine's retry/active-run bookkeeping to be exercised, not real timing.
pub struct AlwaysFailTransport;

#[async_trait::async_trait]
impl ProbeTransport for AlwaysFailTransport {
    async fn send(&self, _url: &str, _deadline: Duration) -> Result<RawResponse, ProbeError> {
        Err(ProbeError::Transport("simulated failure".to_string()))
    }
}
