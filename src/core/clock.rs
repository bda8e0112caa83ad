//! Monotonic/wall-clock time sources and the precision scheduled-release
//! primitive (spec §4.1).
//!
//! The two time domains are kept deliberately distinct in the type system:
//! [`Instant`] never regresses and is the only thing RTTs or schedule
//! deadlines are computed from; `wall_ms` is only ever used to correlate
//! against a server's reported time. Mixing them up is the single easiest
//! way to silently corrupt an offset calculation, which is why every
//! reading that needs both takes them back to back in [`Clock::sample`].

use async_trait::async_trait;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A monotonic instant paired with the wall-clock instant (ms since the
/// Unix epoch) observed at essentially the same moment.
#[derive(Debug, Clone, Copy)]
pub struct ClockSample {
    pub monotonic: Instant,
    pub wall_ms: i64,
}

/// Precision Clock abstraction (spec §4.1), implemented once against the
/// real OS clock and once against a virtual clock for tests.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now_monotonic(&self) -> Instant;

    fn now_wall_ms(&self) -> i64;

    /// A monotonic/wall pair taken as close together as the platform
    /// allows, so that converting between the two domains for the same
    /// instant is safe.
    fn sample(&self) -> ClockSample {
        ClockSample {
            monotonic: self.now_monotonic(),
            wall_ms: self.now_wall_ms(),
        }
    }

    /// Converts a monotonic instant to the wall-clock instant it
    /// corresponds to, using a fresh [`sample`](Clock::sample) as the
    /// reference point.
    fn monotonic_to_wall_ms(&self, instant: Instant) -> i64 {
        let reference = self.sample();
        let delta = instant.checked_duration_since(reference.monotonic);
        match delta {
            Some(d) => reference.wall_ms + d.as_millis() as i64,
            None => {
                let back = reference.monotonic - instant;
                reference.wall_ms - back.as_millis() as i64
            }
        }
    }

    /// Blocks the current task until the monotonic clock reaches `target`.
    ///
    /// Wakes at least [`COARSE_SLEEP_BUFFER`] before the target via a
    /// coarse OS sleep, then busy-waits the remainder (bounded by
    /// [`MAX_BUSY_WAIT`]) for sub-100µs accuracy. If the coarse sleep
    /// overshoots `target` outright, returns immediately; the caller
    /// records the overshoot rather than retrying.
    async fn sleep_until(&self, target: Instant) -> i64;
}

/// Wake at least this long before the target via the OS scheduler.
pub const COARSE_SLEEP_BUFFER: Duration = Duration::from_millis(2);
/// Upper bound on the busy-wait tail; if the coarse sleep put us further
/// than this from the target, we've already overshot and just return.
pub const MAX_BUSY_WAIT: Duration = Duration::from_millis(5);

/// The real OS clock: [`Instant`] for monotonic reads, [`SystemTime`] for
/// wall reads, `tokio::time::sleep` + a busy-wait tail for scheduling.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn now_wall_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    async fn sleep_until(&self, target: Instant) -> i64 {
        let now = Instant::now();
        if target <= now {
            return -(now.duration_since(target).as_micros() as i64);
        }

        let remaining = target - now;
        if remaining > COARSE_SLEEP_BUFFER {
            #[cfg(feature = "network-monitoring")]
            tokio::time::sleep(remaining - COARSE_SLEEP_BUFFER).await;
            #[cfg(not(feature = "network-monitoring"))]
            std::thread::sleep(remaining - COARSE_SLEEP_BUFFER);
        }

        loop {
            let now = Instant::now();
            if now >= target {
                return now.duration_since(target).as_micros() as i64;
            }
            if now.duration_since(target.checked_sub(MAX_BUSY_WAIT).unwrap_or(now))
                > MAX_BUSY_WAIT
            {
                // Coarse sleep overshot by more than the spin budget allows;
                // give up on precision for this probe rather than spin
                // indefinitely.
                return -(target.duration_since(now).as_micros() as i64);
            }
            std::hint::spin_loop();
        }
    }
}

/// Deterministic virtual clock for tests: monotonic and wall time both
/// advance only when told to, and `sleep_until` resolves instantly.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    pub struct MockClock {
        inner: Mutex<MockClockState>,
        base: Instant,
    }

    struct MockClockState {
        monotonic_offset: Duration,
        wall_ms: i64,
    }

    impl MockClock {
        pub fn new(initial_wall_ms: i64) -> Self {
            Self {
                inner: Mutex::new(MockClockState {
                    monotonic_offset: Duration::ZERO,
                    wall_ms: initial_wall_ms,
                }),
                base: Instant::now(),
            }
        }

        /// Advances both the monotonic and wall clocks by `duration`,
        /// simulating real elapsed time.
        pub fn advance(&self, duration: Duration) {
            let mut state = self.inner.lock().unwrap();
            state.monotonic_offset += duration;
            state.wall_ms += duration.as_millis() as i64;
        }

        /// Steps the wall clock alone, simulating drift between the two
        /// domains (used to test clock-reversal / anomaly handling).
        pub fn step_wall_ms(&self, delta_ms: i64) {
            let mut state = self.inner.lock().unwrap();
            state.wall_ms += delta_ms;
        }
    }

    #[async_trait]
    impl Clock for MockClock {
        fn now_monotonic(&self) -> Instant {
            let state = self.inner.lock().unwrap();
            self.base + state.monotonic_offset
        }

        fn now_wall_ms(&self) -> i64 {
            self.inner.lock().unwrap().wall_ms
        }

        async fn sleep_until(&self, target: Instant) -> i64 {
            let now = self.now_monotonic();
            if target > now {
                self.advance(target - now);
            }
            0
        }
    }
}
