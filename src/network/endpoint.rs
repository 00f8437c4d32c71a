//! Endpoint Resolution
//!
//! Exactly one channel address is resolved before connecting. Resolution
//! order: explicit endpoint, then the environment override, then a
//! `ws`/`wss` URL built from the host, with the scheme following `secure`.

/// Inputs for resolving the verifier's base endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Endpoint set by the embedding application. Wins over everything.
    pub explicit: Option<String>,
    /// Deployment override (`PAN_RETURN_SERVER_URL`).
    pub env_override: Option<String>,
    /// Host (and optional port) used when nothing else is set.
    pub host: String,
    /// Use `wss` for the host fallback.
    pub secure: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            explicit: None,
            env_override: None,
            host: "localhost:8000".to_string(),
            secure: false,
        }
    }
}

impl EndpointConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            explicit: None,
            env_override: std::env::var("PAN_RETURN_SERVER_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            host: std::env::var("PAN_RETURN_HOST").unwrap_or(defaults.host),
            secure: std::env::var("PAN_RETURN_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Set an explicit endpoint.
    pub fn with_explicit(mut self, endpoint: impl Into<String>) -> Self {
        self.explicit = Some(endpoint.into());
        self
    }

    /// The base endpoint, without the session path.
    pub fn base(&self) -> String {
        if let Some(explicit) = non_empty(&self.explicit) {
            return explicit.to_string();
        }
        if let Some(env) = non_empty(&self.env_override) {
            return env.to_string();
        }
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}", scheme, self.host)
    }

    /// Full channel address for `session_id`.
    pub fn session_url(&self, session_id: &str) -> String {
        session_url(&self.base(), session_id)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Join a base endpoint with the session resource path.
pub fn session_url(base: &str, session_id: &str) -> String {
    format!(
        "{}/ws/session/{}",
        base.trim_end_matches('/'),
        session_id.trim_start_matches('/')
    )
}
