//! Reconnection State
//!
//! All reconnection bookkeeping (attempt counter, backoff delay, intentional
//! close flag) lives in one struct and only changes through the transition
//! methods below. The connection task owns it; nothing else mutates it.

use std::time::Duration;

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Lifecycle of the logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// Never connected.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport reported ready.
    Open,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Closed on request; never reconnects.
    Closed,
    /// Reconnect budget used up.
    Exhausted,
}

/// What to do after the channel dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make attempt number `attempt` (1-based).
    Retry {
        /// Attempt number.
        attempt: u32,
        /// Backoff before the attempt.
        delay: Duration,
    },
    /// Stop and report exhaustion to the consumer.
    GiveUp {
        /// Attempts made.
        attempts: u32,
    },
    /// Closed intentionally; do nothing.
    Stop,
}

/// Reconnection state machine.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    phase: LinkPhase,
    attempts: u32,
    delay: Duration,
}

impl ReconnectState {
    /// Create state for a fresh channel.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            phase: LinkPhase::Idle,
            attempts: 0,
            delay: policy.initial_delay,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// Consecutive failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether `close()` was requested.
    pub fn is_closed(&self) -> bool {
        self.phase == LinkPhase::Closed
    }

    /// Whether the channel is open for sends.
    pub fn is_open(&self) -> bool {
        self.phase == LinkPhase::Open
    }

    /// Mark a connection attempt as started.
    ///
    /// Returns `false` when an attempt is already in flight or the channel
    /// is closed, in which case the caller must not connect.
    pub fn begin_connect(&mut self) -> bool {
        match self.phase {
            LinkPhase::Idle | LinkPhase::Reconnecting => {
                self.phase = LinkPhase::Connecting;
                true
            }
            _ => false,
        }
    }

    /// Transport reported ready: reset counters.
    pub fn on_connected(&mut self) {
        if self.phase == LinkPhase::Closed {
            return;
        }
        self.phase = LinkPhase::Open;
        self.attempts = 0;
        self.delay = self.policy.initial_delay;
    }

    /// The first attempt failed. Back to idle without touching the retry budget.
    pub fn on_initial_failure(&mut self) {
        if self.phase == LinkPhase::Connecting {
            self.phase = LinkPhase::Idle;
        }
    }

    /// The channel dropped or an attempt failed.
    pub fn on_disconnect(&mut self) -> ReconnectDecision {
        match self.phase {
            LinkPhase::Closed => return ReconnectDecision::Stop,
            LinkPhase::Exhausted => {
                return ReconnectDecision::GiveUp {
                    attempts: self.attempts,
                }
            }
            _ => {}
        }

        if self.attempts >= self.policy.max_attempts {
            self.phase = LinkPhase::Exhausted;
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.policy.max_delay);
        self.phase = LinkPhase::Reconnecting;

        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Intentional close. Idempotent.
    pub fn close(&mut self) {
        self.phase = LinkPhase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn delays(state: &mut ReconnectState, failures: usize) -> Vec<ReconnectDecision> {
        (0..failures).map(|_| state.on_disconnect()).collect()
    }

    #[test]
    fn test_backoff_doubles_then_gives_up() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        assert!(state.begin_connect());
        state.on_connected();

        let decisions = delays(&mut state, 6);
        let expected: Vec<ReconnectDecision> = [1, 2, 4, 8, 16]
            .iter()
            .enumerate()
            .map(|(i, secs)| ReconnectDecision::Retry {
                attempt: i as u32 + 1,
                delay: Duration::from_secs(*secs),
            })
            .chain(std::iter::once(ReconnectDecision::GiveUp { attempts: 5 }))
            .collect();

        assert_eq!(decisions, expected);
        assert_eq!(state.phase(), LinkPhase::Exhausted);
        assert_eq!(state.on_disconnect(), ReconnectDecision::GiveUp { attempts: 5 });
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 8,
            ..Default::default()
        };
        let mut state = ReconnectState::new(policy);

        let secs: Vec<u64> = delays(&mut state, 8)
            .into_iter()
            .filter_map(|d| match d {
                ReconnectDecision::Retry { delay, .. } => Some(delay.as_secs()),
                _ => None,
            })
            .collect();

        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_success_resets_counters() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        state.on_disconnect();
        state.on_disconnect();
        state.on_disconnect();
        assert_eq!(state.attempts(), 3);

        assert!(state.begin_connect());
        state.on_connected();
        assert_eq!(state.attempts(), 0);
        assert!(state.is_open());

        assert_eq!(
            state.on_disconnect(),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_close_suppresses_reconnect() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        state.begin_connect();
        state.on_connected();

        state.close();
        state.close();
        assert_eq!(state.on_disconnect(), ReconnectDecision::Stop);
        assert!(!state.begin_connect());

        state.on_connected();
        assert!(state.is_closed());
    }

    #[test]
    fn test_initial_failure_returns_to_idle() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        assert!(state.begin_connect());
        state.on_initial_failure();
        assert_eq!(state.phase(), LinkPhase::Idle);
        assert_eq!(state.attempts(), 0);
        assert!(state.begin_connect());
    }

    #[test]
    fn test_no_concurrent_connect() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        assert!(state.begin_connect());
        assert!(!state.begin_connect());

        state.on_disconnect();
        assert!(state.begin_connect());
        assert!(!state.begin_connect());
    }

    proptest! {
        #[test]
        fn prop_delays_monotonic_and_bounded(max_attempts in 1u32..20, initial_ms in 1u64..5000) {
            let policy = ReconnectPolicy {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_secs(30),
                max_attempts,
            };
            let mut state = ReconnectState::new(policy);
            let mut last = Duration::ZERO;
            let mut retries = 0;

            loop {
                match state.on_disconnect() {
                    ReconnectDecision::Retry { delay, .. } => {
                        prop_assert!(delay >= last || delay == policy.max_delay);
                        prop_assert!(delay <= policy.max_delay.max(policy.initial_delay));
                        last = delay;
                        retries += 1;
                    }
                    ReconnectDecision::GiveUp { attempts } => {
                        prop_assert_eq!(attempts, max_attempts);
                        break;
                    }
                    ReconnectDecision::Stop => prop_assert!(false, "never closed"),
                }
            }
            prop_assert_eq!(retries, max_attempts);
        }
    }
}
