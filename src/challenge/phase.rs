//! Challenge phases.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One stage of the Pan & Return challenge, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Hold the device still facing the camera.
    Baseline,
    /// Pan the device to one side.
    Pan,
    /// Bring the device back to center.
    Return,
    /// Waiting for the verifier. Terminal-pending.
    Analyzing,
}

impl Phase {
    /// All phases in visiting order.
    pub const SEQUENCE: [Phase; 4] = [
        Phase::Baseline,
        Phase::Pan,
        Phase::Return,
        Phase::Analyzing,
    ];

    /// Wire identifier.
    pub fn id(self) -> &'static str {
        match self {
            Phase::Baseline => "baseline",
            Phase::Pan => "pan",
            Phase::Return => "return",
            Phase::Analyzing => "analyzing",
        }
    }

    /// Display title.
    pub fn title(self) -> &'static str {
        match self {
            Phase::Baseline => "Hold Still",
            Phase::Pan => "Pan Left",
            Phase::Return => "Return to Center",
            Phase::Analyzing => "Analyzing",
        }
    }

    /// Instruction shown to the user.
    pub fn instruction(self) -> &'static str {
        match self {
            Phase::Baseline => "Look straight at the camera and keep the phone steady.",
            Phase::Pan => "Slowly turn the phone to the left while keeping your face in frame.",
            Phase::Return => "Bring the phone back so it faces you again.",
            Phase::Analyzing => "Hang on while we verify your session.",
        }
    }

    /// How long the phase lasts. `None` for the terminal-pending phase.
    pub fn duration(self) -> Option<Duration> {
        match self {
            Phase::Baseline => Some(Duration::from_millis(1000)),
            Phase::Pan => Some(Duration::from_millis(2000)),
            Phase::Return => Some(Duration::from_millis(2000)),
            Phase::Analyzing => None,
        }
    }

    /// The following phase, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Baseline => Some(Phase::Pan),
            Phase::Pan => Some(Phase::Return),
            Phase::Return => Some(Phase::Analyzing),
            Phase::Analyzing => None,
        }
    }

    /// Whether the phase ends on its own timer.
    pub fn is_timed(self) -> bool {
        self.duration().is_some()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// UI event emitted once on every phase entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseChange {
    /// Phase entered.
    pub phase: Phase,
    /// Display title.
    pub title: &'static str,
    /// User instruction.
    pub instruction: &'static str,
    /// Phase length; `None` means wait indefinitely.
    pub duration_ms: Option<u64>,
}

impl From<Phase> for PhaseChange {
    fn from(phase: Phase) -> Self {
        Self {
            phase,
            title: phase.title(),
            instruction: phase.instruction(),
            duration_ms: phase.duration().map(|d| d.as_millis() as u64),
        }
    }
}
