//! Challenge Layer
//!
//! The timed phase sequence and the controller that walks it.

pub mod controller;
pub mod phase;

pub use controller::ChallengeController;
pub use phase::{Phase, PhaseChange};
