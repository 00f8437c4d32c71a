//! Error Kinds
//!
//! Setup-time failures (permissions, camera, initial connect) surface to the
//! caller as `Err`. Runtime faults are absorbed where they happen; only
//! reconnection exhaustion reaches the consumer, as a synthetic `error`
//! inbound message.

use std::time::Duration;
use thiserror::Error;

/// Which hardware gate refused access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Motion sensors (accelerometer / gyroscope).
    Motion,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Motion => f.write_str("motion"),
        }
    }
}

/// Sensor and camera errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or platform refused access.
    #[error("{0} access denied")]
    PermissionDenied(SensorKind),

    /// No capture device, or acquisition failed.
    #[error("camera unavailable: {reason}")]
    CameraUnavailable {
        /// Underlying reason, when the platform gave one.
        reason: String,
    },

    /// Operation invoked before its required setup step.
    #[error("{0} called before initialize")]
    NotInitialized(&'static str),
}

/// Channel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// Initial connection attempt failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    TimedOut(Duration),

    /// Reconnection budget used up.
    #[error("reconnection exhausted after {attempts} attempts")]
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The manager was closed intentionally.
    #[error("connection closed")]
    Closed,
}

/// Inbound payload errors. Logged and dropped, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Inbound text was not a typed JSON object.
    #[error("malformed inbound message: {0}")]
    MalformedInbound(String),
}

/// Session-level errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Sensor or camera setup failed.
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Channel setup failed.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Device capability preflight failed.
    #[error("device not compatible: {}", reasons.join(", "))]
    Incompatible {
        /// Human-readable reasons from the capability check.
        reasons: Vec<String>,
    },

    /// Aborted before the challenge started.
    #[error("session aborted")]
    Aborted,
}
