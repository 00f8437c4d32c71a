//! Protocol Messages
//!
//! Wire format for the verification channel. Control messages are JSON
//! objects tagged with `type`. Binary frames carry raw media and are always
//! preceded by exactly one `video_chunk` control message describing them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capture::motion::MotionSample;
use crate::challenge::phase::Phase;
use crate::error::ProtocolError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Control messages sent from the device to the verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A timed challenge phase finished locally.
    PhaseComplete {
        /// Phase that completed (`baseline`, `pan` or `return`).
        phase: Phase,
    },

    /// A batch of motion samples in sampling order.
    ImuBatch {
        /// Samples, oldest first.
        payload: Vec<MotionSample>,
        /// Wall-clock send time (epoch ms).
        timestamp: i64,
    },

    /// Metadata for the binary frame that immediately follows.
    VideoChunk(VideoChunkMeta),
}

/// Describes one binary media frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoChunkMeta {
    /// Byte length of the binary frame.
    pub size: usize,
    /// Wall-clock production time (epoch ms).
    pub timestamp: i64,
    /// Per-session sequence number, starting at 0.
    pub sequence: u64,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// An inbound control message.
///
/// The `type` is peer-defined and carried opaquely; the remaining fields are
/// kept as raw JSON for the session driver to interpret.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// All other fields.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl InboundMessage {
    /// Reserved type synthesized locally when reconnection is exhausted.
    pub const ERROR: &'static str = "error";

    /// Type the verifier uses to conclude a session.
    pub const RESULT: &'static str = "result";

    /// Build a message with an empty body.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: Map::new(),
        }
    }

    /// Add a body field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// The synthetic `error` emitted after the last reconnect attempt fails.
    pub fn connection_exhausted(attempts: u32) -> Self {
        Self::new(Self::ERROR)
            .with_field("code", "connection_exhausted")
            .with_field("message", "Connection lost. Please restart the session.")
            .with_field("attempts", attempts)
    }

    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedInbound(e.to_string()))?;

        let Value::Object(mut body) = value else {
            return Err(ProtocolError::MalformedInbound("not a JSON object".into()));
        };

        match body.remove("type") {
            Some(Value::String(kind)) => Ok(Self { kind, body }),
            Some(_) => Err(ProtocolError::MalformedInbound("`type` is not a string".into())),
            None => Err(ProtocolError::MalformedInbound("missing `type`".into())),
        }
    }

    /// Look up a body field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Whether this is an `error` message.
    pub fn is_error(&self) -> bool {
        self.kind == Self::ERROR
    }

    /// Whether this concludes the verification.
    pub fn is_result(&self) -> bool {
        self.kind == Self::RESULT
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::PhaseComplete { .. } => "phase_complete",
            ClientMessage::ImuBatch { .. } => "imu_batch",
            ClientMessage::VideoChunk(_) => "video_chunk",
        }
    }
}

impl InboundMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::motion::{Axes, RotationRate};

    #[test]
    fn test_phase_complete_wire_shape() {
        let msg = ClientMessage::PhaseComplete { phase: Phase::Return };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "phase_complete");
        assert_eq!(value["phase"], "return");
        assert_eq!(msg.kind(), "phase_complete");
    }

    #[test]
    fn test_video_chunk_wire_shape() {
        let msg = ClientMessage::VideoChunk(VideoChunkMeta {
            size: 4096,
            timestamp: 1_700_000_000_000,
            sequence: 7,
        });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "video_chunk");
        assert_eq!(value["size"], 4096);
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        assert_eq!(value["sequence"], 7);
    }

    #[test]
    fn test_imu_batch_json_roundtrip() {
        let sample = MotionSample {
            timestamp: 16.5,
            acceleration: Axes { x: 0.1, y: -0.2, z: 0.0 },
            acceleration_including_gravity: Axes { x: 0.1, y: 9.6, z: 0.3 },
            rotation_rate: RotationRate { alpha: 1.0, beta: 0.0, gamma: -1.0 },
            interval: 16.0,
        };
        let msg = ClientMessage::ImuBatch {
            payload: vec![sample],
            timestamp: 42,
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"imu_batch\""));
        assert!(json.contains("acceleration_including_gravity"));

        let parsed = ClientMessage::from_json(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_parse_opaque_server_type() {
        let msg = InboundMessage::parse(r#"{"type":"face_detected","confidence":0.93}"#).unwrap();
        assert_eq!(msg.kind, "face_detected");
        assert_eq!(msg.get("confidence"), Some(&serde_json::json!(0.93)));
        assert!(msg.get("type").is_none());
        assert!(!msg.is_error());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            InboundMessage::parse("not json"),
            Err(ProtocolError::MalformedInbound(_))
        ));
        assert!(InboundMessage::parse("[1,2,3]").is_err());
        assert!(InboundMessage::parse(r#"{"phase":"pan"}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":7}"#).is_err());
    }

    #[test]
    fn test_connection_exhausted_message() {
        let msg = InboundMessage::connection_exhausted(5);
        assert!(msg.is_error());
        assert_eq!(msg.get("attempts"), Some(&serde_json::json!(5)));

        let json = msg.to_json().unwrap();
        let reparsed = InboundMessage::parse(&json).unwrap();
        assert_eq!(reparsed, msg);
    }

    #[test]
    fn test_result_message() {
        let msg = InboundMessage::parse(r#"{"type":"result","trust_score":0.8}"#).unwrap();
        assert!(msg.is_result());
    }
}
