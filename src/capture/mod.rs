//! Capture Layer
//!
//! Motion sensors and camera, each behind an injected device trait.

pub mod capability;
pub mod media;
pub mod motion;
pub mod simulated;

pub use capability::{
    CapabilityReport, DeviceCapabilityChecker, DeviceInfo, StaticCapabilityChecker,
};
pub use media::{CameraDevice, CameraFeed, MediaChunk, MediaConfig, MediaStreamer, PreviewStream};
pub use motion::{
    Axes, MotionConfig, MotionSample, MotionSampler, MotionSource, RateLimiter, RawMotionEvent,
    RotationRate, SamplerStatus,
};
pub use simulated::{SimulatedCamera, SimulatedMotionSource};
