//! Device capability preflight.
//!
//! Checked once before a session starts. Nothing downstream re-validates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Facts about the device, reported alongside the verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform name.
    pub platform: String,
    /// Whether the device is handheld.
    pub mobile: bool,
    /// A camera is present.
    pub has_camera: bool,
    /// Motion sensors are present.
    pub has_motion_sensors: bool,
}

/// Preflight result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityReport {
    /// Whether a session may start.
    pub compatible: bool,
    /// Why not, one entry per failed check.
    pub reasons: Vec<String>,
    /// Device details.
    pub device_info: DeviceInfo,
}

impl CapabilityReport {
    /// Build a report from device facts.
    pub fn evaluate(device_info: DeviceInfo) -> Self {
        let mut reasons = Vec::new();
        if !device_info.has_camera {
            reasons.push("No camera detected".to_string());
        }
        if !device_info.has_motion_sensors {
            reasons.push("Motion sensors not available".to_string());
        }
        if !device_info.mobile {
            reasons.push("A mobile device is required".to_string());
        }

        Self {
            compatible: reasons.is_empty(),
            reasons,
            device_info,
        }
    }
}

/// Preflight gate.
#[async_trait]
pub trait DeviceCapabilityChecker: Send + Sync {
    /// Run the preflight.
    async fn check(&self) -> CapabilityReport;
}

/// Checker that reports fixed device facts.
#[derive(Debug, Clone)]
pub struct StaticCapabilityChecker {
    info: DeviceInfo,
}

impl StaticCapabilityChecker {
    /// Report `info`.
    pub fn new(info: DeviceInfo) -> Self {
        Self { info }
    }

    /// A device with everything a session needs.
    pub fn capable(platform: impl Into<String>) -> Self {
        Self::new(DeviceInfo {
            platform: platform.into(),
            mobile: true,
            has_camera: true,
            has_motion_sensors: true,
        })
    }
}

#[async_trait]
impl DeviceCapabilityChecker for StaticCapabilityChecker {
    async fn check(&self) -> CapabilityReport {
        CapabilityReport::evaluate(self.info.clone())
    }
}
