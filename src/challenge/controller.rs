//! Challenge Controller
//!
//! Walks the fixed phase sequence on a logical clock. Every phase entry emits
//! one [`PhaseChange`]; every timed phase, once its duration has elapsed,
//! sends one `phase_complete` and moves on. Time only enters through
//! [`ChallengeController::advance`], so a caller can drive it from a real
//! timer or step it exactly in tests.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::challenge::phase::{Phase, PhaseChange};
use crate::core::{Millis, TimerQueue};
use crate::network::connection::ControlSink;
use crate::network::protocol::ClientMessage;

/// Drives the phase state machine.
pub struct ChallengeController<S: ControlSink> {
    sink: S,
    observer: Option<mpsc::UnboundedSender<PhaseChange>>,
    timers: TimerQueue<Phase>,
    phase: Option<Phase>,
}

impl<S: ControlSink> ChallengeController<S> {
    /// Create an idle controller sending completions through `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            observer: None,
            timers: TimerQueue::new(),
            phase: None,
        }
    }

    /// Register the UI observer, replacing any previous one.
    pub fn on_phase_change(&mut self) -> mpsc::UnboundedReceiver<PhaseChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        rx
    }

    /// Current phase. `None` while idle.
    pub fn current_phase(&self) -> Option<Phase> {
        self.phase
    }

    /// When the pending phase timer fires, if one is scheduled.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.timers.next_deadline()
    }

    /// Whether the sequence reached the terminal-pending phase.
    pub fn is_analyzing(&self) -> bool {
        self.phase == Some(Phase::Analyzing)
    }

    /// Clear pending timers and enter `baseline` at `now`.
    pub fn start_challenge(&mut self, now: Millis) {
        self.clear_timers();
        info!("Starting challenge");
        self.enter(Phase::Baseline, now);
    }

    /// Fire every timer due at or before `now`, in deadline order.
    ///
    /// A late call catches up: each following phase is scheduled from the
    /// previous deadline, not from `now`. Returns the phases completed.
    pub fn advance(&mut self, now: Millis) -> Vec<Phase> {
        let mut completed = Vec::new();

        while let Some(due) = self.timers.pop_due(now) {
            if self.phase != Some(due.token) {
                debug!("Ignoring stale timer for {}", due.token);
                continue;
            }
            self.complete(due.token, due.deadline);
            completed.push(due.token);
        }

        completed
    }

    /// Cancel all pending phase timers. No events, no messages.
    pub fn clear_timers(&mut self) {
        if !self.timers.is_empty() {
            debug!("Cancelling {} phase timer(s)", self.timers.len());
        }
        self.timers.clear();
    }

    fn enter(&mut self, phase: Phase, at: Millis) {
        self.phase = Some(phase);
        info!("Phase {} entered", phase);

        if let Some(observer) = &self.observer {
            if observer.send(PhaseChange::from(phase)).is_err() {
                debug!("Phase observer went away");
                self.observer = None;
            }
        }

        if let Some(duration) = phase.duration() {
            self.timers.schedule(at + duration.as_millis() as Millis, phase);
        }
    }

    fn complete(&mut self, phase: Phase, at: Millis) {
        info!("Phase {} complete", phase);

        if !self.sink.send_control(&ClientMessage::PhaseComplete { phase }) {
            debug!("phase_complete for {} was dropped", phase);
        }

        if let Some(next) = phase.next() {
            self.enter(next, at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<ClientMessage>>>,
        drop_all: bool,
    }

    impl RecordingSink {
        fn completed(&self) -> Vec<Phase> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|m| match m {
                    ClientMessage::PhaseComplete { phase } => Some(*phase),
                    _ => None,
                })
                .collect()
        }
    }

    impl ControlSink for RecordingSink {
        fn send_control(&self, message: &ClientMessage) -> bool {
            if self.drop_all {
                return false;
            }
            self.sent.lock().unwrap().push(message.clone());
            true
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PhaseChange>) -> Vec<Phase> {
        let mut phases = Vec::new();
        while let Ok(change) = rx.try_recv() {
            phases.push(change.phase);
        }
        phases
    }

    #[test]
    fn test_idle_until_started() {
        let controller = ChallengeController::new(RecordingSink::default());
        assert_eq!(controller.current_phase(), None);
        assert_eq!(controller.next_deadline(), None);
    }

    #[test]
    fn test_baseline_completes_after_exactly_1000ms() {
        let sink = RecordingSink::default();
        let mut controller = ChallengeController::new(sink.clone());
        let mut events = controller.on_phase_change();

        controller.start_challenge(0);
        assert_eq!(drain(&mut events), vec![Phase::Baseline]);

        assert!(controller.advance(999).is_empty());
        assert!(sink.completed().is_empty());

        assert_eq!(controller.advance(1000), vec![Phase::Baseline]);
        assert_eq!(sink.completed(), vec![Phase::Baseline]);
        assert_eq!(controller.current_phase(), Some(Phase::Pan));
        assert_eq!(drain(&mut events), vec![Phase::Pan]);
        assert_eq!(controller.next_deadline(), Some(3000));
    }

    #[test]
    fn test_full_sequence_visits_each_phase_once() {
        let sink = RecordingSink::default();
        let mut controller = ChallengeController::new(sink.clone());
        let mut events = controller.on_phase_change();

        controller.start_challenge(100);
        controller.advance(1100);
        controller.advance(3100);
        controller.advance(5100);
        controller.advance(60_000);

        assert_eq!(drain(&mut events), Phase::SEQUENCE.to_vec());
        assert_eq!(sink.completed(), vec![Phase::Baseline, Phase::Pan, Phase::Return]);
        assert!(controller.is_analyzing());
        assert_eq!(controller.next_deadline(), None);
    }

    #[test]
    fn test_analyzing_event_has_no_duration() {
        let mut controller = ChallengeController::new(RecordingSink::default());
        let mut events = controller.on_phase_change();
        controller.start_challenge(0);
        controller.advance(5000);

        let last = std::iter::from_fn(|| events.try_recv().ok()).last().unwrap();
        assert_eq!(last.phase, Phase::Analyzing);
        assert_eq!(last.duration_ms, None);
    }

    #[test]
    fn test_late_advance_catches_up_in_order() {
        let sink = RecordingSink::default();
        let mut controller = ChallengeController::new(sink.clone());

        controller.start_challenge(0);
        assert_eq!(controller.advance(4000), vec![Phase::Baseline, Phase::Pan]);
        // Return was entered at the pan deadline (3000), not at 4000.
        assert_eq!(controller.next_deadline(), Some(5000));
    }

    #[test]
    fn test_clear_timers_prevents_completion() {
        let sink = RecordingSink::default();
        let mut controller = ChallengeController::new(sink.clone());
        let mut events = controller.on_phase_change();

        controller.start_challenge(0);
        controller.advance(500);
        controller.clear_timers();
        controller.clear_timers();

        assert!(controller.advance(10_000).is_empty());
        assert!(sink.completed().is_empty());
        assert_eq!(controller.current_phase(), Some(Phase::Baseline));
        assert_eq!(drain(&mut events), vec![Phase::Baseline]);
    }

    #[test]
    fn test_restart_mid_challenge_never_double_announces() {
        let sink = RecordingSink::default();
        let mut controller = ChallengeController::new(sink.clone());

        controller.start_challenge(0);
        controller.advance(1500);
        assert_eq!(controller.current_phase(), Some(Phase::Pan));

        controller.start_challenge(1500);
        assert_eq!(controller.current_phase(), Some(Phase::Baseline));
        // The old pan deadline at 3000 is gone.
        assert!(controller.advance(2499).is_empty());
        assert_eq!(controller.advance(2500), vec![Phase::Baseline]);
        assert_eq!(controller.advance(4500), vec![Phase::Pan]);

        assert_eq!(
            sink.completed(),
            vec![Phase::Baseline, Phase::Baseline, Phase::Pan]
        );
    }

    #[test]
    fn test_dropped_sends_do_not_stall() {
        let sink = RecordingSink {
            drop_all: true,
            ..Default::default()
        };
        let mut controller = ChallengeController::new(sink);
        controller.start_challenge(0);
        controller.advance(5000);
        assert!(controller.is_analyzing());
    }

    proptest! {
        #[test]
        fn prop_any_advance_schedule_completes_each_phase_once(
            steps in proptest::collection::vec(0u64..1500, 1..40)
        ) {
            let sink = RecordingSink::default();
            let mut controller = ChallengeController::new(sink.clone());
            let mut events = controller.on_phase_change();
            controller.start_challenge(0);

            let mut now = 0;
            for step in steps {
                now += step;
                controller.advance(now);
            }

            let deadlines = [
                (1000, Phase::Baseline),
                (3000, Phase::Pan),
                (5000, Phase::Return),
            ];
            let expected: Vec<Phase> = deadlines
                .iter()
                .filter(|(deadline, _)| now >= *deadline)
                .map(|(_, phase)| *phase)
                .collect();
            prop_assert_eq!(sink.completed(), expected.clone());
            prop_assert_eq!(drain(&mut events).len(), expected.len() + 1);
        }
    }
}
