//! Logical Clock
//!
//! Millisecond time source used to drive phase timers and stamp
//! simulated sensor events. Production code uses the tokio clock so
//! paused-time tests stay deterministic; unit tests drive a manual clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Milliseconds on a monotonic session timeline.
pub type Millis = u64;

/// A source of monotonic milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock's origin.
    fn now_ms(&self) -> Millis;
}

/// Clock backed by `tokio::time::Instant`.
///
/// Honors `tokio::time::pause()`, so a paused test runtime sees virtual time.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }

    /// Convert a timeline value back into a tokio instant.
    pub fn instant_at(&self, at: Millis) -> Instant {
        self.origin + std::time::Duration::from_millis(at)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the absolute time.
    pub fn set(&self, at: Millis) {
        self.now.store(at, Ordering::SeqCst);
    }

    /// Advance by `delta` milliseconds, returning the new time.
    pub fn advance(&self, delta: Millis) -> Millis {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Wall-clock milliseconds since the Unix epoch, used for wire timestamps.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
