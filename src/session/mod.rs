//! Session Layer
//!
//! Configuration, IMU batching and the driver that runs one verification
//! attempt end to end.

pub mod batch;
pub mod config;
pub mod driver;

pub use batch::ImuBatcher;
pub use config::SessionConfig;
pub use driver::{SessionCommand, SessionControl, SessionEvent, SessionOutcome, VerificationSession};
