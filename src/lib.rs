//! # Pan & Return Verification Client
//!
//! Device-side client for the Pan & Return liveness challenge. Streams motion
//! samples and camera chunks to a remote verifier over one resilient
//! WebSocket channel while a timed phase sequence paces the user.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PAN & RETURN CLIENT                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── clock.rs    - Logical millisecond clock                 │
//! │  └── timer.rs    - Virtual one-shot timer queue              │
//! │                                                              │
//! │  challenge/      - Phase state machine (deterministic)       │
//! │  ├── phase.rs    - baseline → pan → return → analyzing       │
//! │  └── controller.rs - Timed transitions, phase_complete       │
//! │                                                              │
//! │  capture/        - Sensors                                   │
//! │  ├── motion.rs   - Rate-limited motion sampler               │
//! │  ├── media.rs    - Chunked camera streamer                   │
//! │  ├── capability.rs - Device preflight                        │
//! │  └── simulated.rs - Simulated sensor and camera              │
//! │                                                              │
//! │  network/        - Channel to the verifier                   │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── backoff.rs  - Reconnection state machine                │
//! │  ├── transport.rs - WebSocket frame transport                │
//! │  ├── connection.rs - Reconnecting connection manager         │
//! │  └── endpoint.rs - Endpoint resolution                       │
//! │                                                              │
//! │  session/        - One verification attempt                  │
//! │  ├── config.rs   - Session configuration                     │
//! │  ├── batch.rs    - IMU batching                              │
//! │  └── driver.rs   - Event loop wiring everything together     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantees
//!
//! - Each phase is entered once and completes at most once, after its
//!   duration, never before.
//! - Every binary frame is immediately preceded by its own `video_chunk`
//!   metadata frame, even with concurrent senders.
//! - Media chunks and motion samples keep production order.
//! - A session closed on purpose never reconnects.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod capture;
pub mod challenge;
pub mod core;
pub mod error;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use capture::{MediaStreamer, MotionSample, MotionSampler};
pub use challenge::{ChallengeController, Phase, PhaseChange};
pub use error::{CaptureError, ConnectionError, ProtocolError, SessionError};
pub use network::{ClientMessage, ConnectionManager, InboundMessage};
pub use session::{SessionConfig, SessionEvent, SessionOutcome, VerificationSession};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
