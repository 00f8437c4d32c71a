//! Virtual Timer Queue
//!
//! One-shot timers keyed on a logical millisecond timeline. Nothing fires
//! on its own: the owner asks for due timers with [`TimerQueue::pop_due`]
//! and decides when to wake up via [`TimerQueue::next_deadline`]. Tests
//! advance time by passing a larger `now`.

use std::collections::BTreeMap;

use super::clock::Millis;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// A timer that came due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimer<T> {
    /// Timer handle.
    pub id: TimerId,
    /// Deadline the timer was scheduled for (not the time it was popped).
    pub deadline: Millis,
    /// Caller payload.
    pub token: T,
}

/// Ordered set of pending one-shot timers.
///
/// Timers with equal deadlines fire in scheduling order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    pending: BTreeMap<(Millis, TimerId), T>,
    deadlines: BTreeMap<TimerId, Millis>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            deadlines: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Schedule `token` to fire at `deadline`.
    pub fn schedule(&mut self, deadline: Millis, token: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert((deadline, id), token);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancel a timer. Returns its token if it was still pending.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let deadline = self.deadlines.remove(&id)?;
        self.pending.remove(&(deadline, id))
    }

    /// Cancel every pending timer.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.deadlines.clear();
    }

    /// Remove and return the earliest timer whose deadline is `<= now`.
    pub fn pop_due(&mut self, now: Millis) -> Option<DueTimer<T>> {
        let (&(deadline, id), _) = self.pending.first_key_value()?;
        if deadline > now {
            return None;
        }
        let token = self.pending.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some(DueTimer { id, deadline, token })
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_respects_deadline() {
        let mut timers = TimerQueue::new();
        timers.schedule(1000, "baseline");

        assert!(timers.pop_due(999).is_none());
        let due = timers.pop_due(1000).unwrap();
        assert_eq!(due.token, "baseline");
        assert_eq!(due.deadline, 1000);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_fires_in_deadline_then_schedule_order() {
        let mut timers = TimerQueue::new();
        timers.schedule(300, 'c');
        timers.schedule(100, 'a');
        timers.schedule(300, 'd');
        timers.schedule(200, 'b');

        let mut fired = Vec::new();
        while let Some(due) = timers.pop_due(10_000) {
            fired.push(due.token);
        }
        assert_eq!(fired, vec!['a', 'b', 'c', 'd']);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let mut timers = TimerQueue::new();
        let id = timers.schedule(100, 1);
        timers.schedule(200, 2);

        assert_eq!(timers.cancel(id), Some(1));
        assert_eq!(timers.cancel(id), None);
        assert_eq!(timers.next_deadline(), Some(200));
        assert_eq!(timers.pop_due(500).map(|d| d.token), Some(2));
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut timers = TimerQueue::new();
        let id = timers.schedule(100, ());
        timers.schedule(200, ());
        timers.clear();

        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
        assert!(timers.pop_due(u64::MAX).is_none());
        assert!(timers.cancel(id).is_none());
    }

    #[test]
    fn test_ids_stay_unique_after_clear() {
        let mut timers = TimerQueue::new();
        let first = timers.schedule(100, ());
        timers.clear();
        let second = timers.schedule(100, ());
        assert_ne!(first, second);
        assert_eq!(timers.len(), 1);
    }
}
