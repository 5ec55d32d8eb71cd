//! Time source for pacing and timestamps.
//!
//! Nodes that sleep (remote sink pacing, render failure backoff) or stamp
//! frames take an `Arc<dyn Clock>`, so tests can substitute [`ManualClock`]
//! and assert on sleep durations without waiting.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Monotonic nanoseconds since an arbitrary fixed origin.
    fn monotonic_ns(&self) -> u64;
}

fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Wall-clock implementation backed by [`Instant`] and [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    fn monotonic_ns(&self) -> u64 {
        u64::try_from(origin().elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Virtual clock that only moves when told to.
///
/// `sleep` advances the clock by the requested duration and records it, so a
/// paced loop driven by a `ManualClock` runs instantly and deterministically.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ns: AtomicU64,
    sleep_count: AtomicU64,
    last_sleep_ns: AtomicU64,
    total_slept_ns: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ns: AtomicU64::new(0),
            sleep_count: AtomicU64::new(0),
            last_sleep_ns: AtomicU64::new(0),
            total_slept_ns: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.offset_ns.fetch_add(duration_ns(duration), Ordering::SeqCst);
    }

    /// Number of `sleep` calls.
    pub fn sleep_count(&self) -> u64 {
        self.sleep_count.load(Ordering::SeqCst)
    }

    /// Duration passed to the most recent `sleep`.
    pub fn last_sleep(&self) -> Duration {
        Duration::from_nanos(self.last_sleep_ns.load(Ordering::SeqCst))
    }

    /// Sum of all `sleep` durations.
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.total_slept_ns.load(Ordering::SeqCst))
    }

    /// Elapsed virtual time since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        let ns = duration_ns(duration);
        self.sleep_count.fetch_add(1, Ordering::SeqCst);
        self.last_sleep_ns.store(ns, Ordering::SeqCst);
        self.total_slept_ns.fetch_add(ns, Ordering::SeqCst);
        self.offset_ns.fetch_add(ns, Ordering::SeqCst);
    }

    fn monotonic_ns(&self) -> u64 {
        self.offset_ns.load(Ordering::SeqCst)
    }
}

fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
