//! Core deterministic primitives.
//!
//! Time in this crate is a logical millisecond timeline. Phase progression
//! is computed from it, never from ad hoc sleeps, so tests can step time
//! exactly.

pub mod clock;
pub mod timer;

// Re-export core types
pub use clock::{Clock, ManualClock, Millis, MonotonicClock};
pub use timer::{DueTimer, TimerId, TimerQueue};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a holder panicked.
///
/// Guards are never held across `.await`.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
