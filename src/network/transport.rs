//! Frame Transport
//!
//! The connection manager speaks to the network through [`Connector`],
//! which yields a split sink/stream pair per connection. [`WsConnector`]
//! is the production WebSocket implementation.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// One message on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 control message.
    Text(String),
    /// Raw binary payload.
    Binary(Vec<u8>),
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The other side is gone.
    #[error("transport closed")]
    Closed,

    /// Connection refused or otherwise failed.
    #[error("connect failed: {0}")]
    Refused(String),
}

/// Writing half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully. Errors are ignored.
    async fn close(&mut self);
}

/// Reading half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next data frame. `None` once the peer closed the connection.
    ///
    /// Must be cancel-safe: it is polled inside `select!`.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// An established connection.
pub struct Link {
    /// Writing half.
    pub sink: Box<dyn FrameSink>,
    /// Reading half.
    pub stream: Box<dyn FrameStream>,
}

/// Opens connections to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and complete the handshake.
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

// =============================================================================
// WEBSOCKET
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

struct WsSink(SplitSink<WsStream, Message>);

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (ws_stream, response) = connect_async(url).await?;
        debug!("WebSocket handshake complete ({})", response.status());

        let (write, read) = ws_stream.split();
        Ok(Link {
            sink: Box::new(WsSink(write)),
            stream: Box::new(WsSource(read)),
        })
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.0.send(message).await.map_err(TransportError::from)
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

#[async_trait]
impl FrameStream for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data))),
                Ok(Message::Close(_)) => return None,
                // Ping/pong replies are queued by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

// =============================================================================
// IN-MEMORY TRANSPORT (tests)
// =============================================================================
