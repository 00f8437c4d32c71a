//! Network Layer
//!
//! One logical WebSocket channel per session, with reconnection.
//! Everything here is best-effort except the binary pairing order.

pub mod backoff;
pub mod connection;
pub mod endpoint;
pub mod protocol;
pub mod transport;

pub use backoff::{LinkPhase, ReconnectDecision, ReconnectPolicy, ReconnectState};
pub use connection::{ConnectionHandle, ConnectionManager, ControlSink, LinkLimits};
pub use endpoint::EndpointConfig;
pub use protocol::{ClientMessage, InboundMessage, VideoChunkMeta};
pub use transport::{Connector, Frame, FrameSink, FrameStream, Link, TransportError, WsConnector};
