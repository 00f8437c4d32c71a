//! Session configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::capture::media::MediaConfig;
use crate::capture::motion::MotionConfig;
use crate::network::backoff::ReconnectPolicy;
use crate::network::connection::LinkLimits;
use crate::network::endpoint::EndpointConfig;

/// Everything one verification session needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Opaque session identifier.
    pub session_id: String,
    /// Where the verifier lives.
    pub endpoint: EndpointConfig,
    /// Reconnection backoff.
    pub reconnect: ReconnectPolicy,
    /// Channel timeouts and outbound queue bound.
    pub link: LinkLimits,
    /// Motion sampling.
    pub motion: MotionConfig,
    /// Camera capture.
    pub media: MediaConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            endpoint: EndpointConfig::default(),
            reconnect: ReconnectPolicy::default(),
            link: LinkLimits::default(),
            motion: MotionConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            endpoint: EndpointConfig::from_env(),
            ..Self::default()
        };

        if let Some(id) = std::env::var("PAN_RETURN_SESSION_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            config.session_id = id;
        }
        if let Some(hz) = parse_env::<f64>("PAN_RETURN_MOTION_HZ").filter(|hz| *hz > 0.0) {
            config.motion.target_hz = hz;
        }
        if let Some(ms) = parse_env::<u64>("PAN_RETURN_CHUNK_MS").filter(|ms| *ms > 0) {
            config.media.timeslice = Duration::from_millis(ms);
        }
        if let Some(size) = parse_env::<usize>("PAN_RETURN_IMU_BATCH").filter(|n| *n > 0) {
            config.motion.batch_size = size;
        }
        if let Some(ms) = parse_env::<u64>("PAN_RETURN_HANDSHAKE_MS").filter(|ms| *ms > 0) {
            config.link.handshake_timeout = Duration::from_millis(ms);
        }

        config
    }

    /// Use a specific session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Resolved channel address.
    pub fn url(&self) -> String {
        self.endpoint.session_url(&self.session_id)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
