//! Connection Manager
//!
//! Owns the single logical channel to the verifier. One background task per
//! manager writes every outbound frame, reads every inbound frame and runs
//! the reconnect loop, so sends are serialized and reconnect attempts can
//! never overlap.
//!
//! Every await on the network is bounded: connection attempts by
//! `handshake_timeout`, writes by `write_timeout`, and both end as soon as
//! [`ConnectionManager::close`] is called.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::core::clock::epoch_millis;
use crate::core::lock;
use crate::error::ConnectionError;
use crate::network::backoff::{LinkPhase, ReconnectDecision, ReconnectPolicy, ReconnectState};
use crate::network::protocol::{ClientMessage, InboundMessage, VideoChunkMeta};
use crate::network::transport::{Connector, Frame, FrameSink, Link, TransportError};

/// Time and space bounds for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLimits {
    /// Time allowed for one connection attempt, handshake included.
    pub handshake_timeout: Duration,
    /// Time allowed for one outbound write before the link counts as dropped.
    pub write_timeout: Duration,
    /// Frames queued ahead of the writer. Sends are refused beyond this.
    pub outbound_capacity: usize,
}

impl Default for LinkLimits {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            outbound_capacity: 100,
        }
    }
}

/// Best-effort destination for control messages.
pub trait ControlSink: Send + Sync {
    /// Queue a control message. Returns `false` if it was dropped.
    fn send_control(&self, message: &ClientMessage) -> bool;
}

/// A unit of work for the writer. A binary send is one item so its metadata
/// and payload are written back to back.
#[derive(Debug)]
enum Outbound {
    Control(String),
    Binary { meta: String, data: Vec<u8> },
}

struct Shared {
    state: Mutex<ReconnectState>,
    consumer: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    shutdown: Notify,
    chunk_sequence: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn deliver(&self, message: InboundMessage) {
        let mut consumer = lock(&self.consumer);
        let delivered = match consumer.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                debug!("No inbound consumer, dropping {}", message.kind);
                return;
            }
        };
        if !delivered {
            debug!("Inbound consumer went away");
            *consumer = None;
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable sending side of a [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Whether the channel is currently open.
    pub fn is_open(&self) -> bool {
        lock(&self.shared.state).is_open()
    }

    /// Frames refused because the writer queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Serialize and queue a control message. Dropped if the channel is not
    /// open or the writer is backed up.
    pub fn send_control(&self, message: &ClientMessage) -> bool {
        if !self.is_open() {
            debug!("Channel not open, dropping {}", message.kind());
            return false;
        }

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {}: {}", message.kind(), e);
                return false;
            }
        };

        self.enqueue(Outbound::Control(text))
    }

    /// Queue a binary payload stamped with the current time.
    pub fn send_binary(&self, data: Vec<u8>) -> bool {
        self.send_binary_at(data, epoch_millis())
    }

    /// Queue a binary payload preceded by its `video_chunk` metadata.
    ///
    /// The sequence number advances even when the send is dropped, so the
    /// peer can see gaps.
    pub fn send_binary_at(&self, data: Vec<u8>, timestamp: i64) -> bool {
        let sequence = self.shared.chunk_sequence.fetch_add(1, Ordering::SeqCst);

        if !self.is_open() {
            debug!("Channel not open, dropping chunk {}", sequence);
            return false;
        }

        let meta = ClientMessage::VideoChunk(VideoChunkMeta {
            size: data.len(),
            timestamp,
            sequence,
        });
        let meta = match meta.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize chunk metadata: {}", e);
                return false;
            }
        };

        self.enqueue(Outbound::Binary { meta, data })
    }

    fn enqueue(&self, out: Outbound) -> bool {
        match self.outbound.try_send(out) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Outbound queue full, frame dropped ({} so far)", dropped);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl ControlSink for ConnectionHandle {
    fn send_control(&self, message: &ClientMessage) -> bool {
        ConnectionHandle::send_control(self, message)
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Maintains one reconnecting channel to a fixed address.
pub struct ConnectionManager<C: Connector> {
    url: String,
    connector: Arc<C>,
    limits: LinkLimits,
    handle: ConnectionHandle,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager for `url` with default [`LinkLimits`]. Nothing
    /// happens until [`connect`](Self::connect).
    pub fn new(url: impl Into<String>, connector: C, policy: ReconnectPolicy) -> Self {
        Self::with_limits(url, connector, policy, LinkLimits::default())
    }

    /// Create a manager with explicit timeouts and queue bound.
    pub fn with_limits(
        url: impl Into<String>,
        connector: C,
        policy: ReconnectPolicy,
        limits: LinkLimits,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(limits.outbound_capacity.max(1));
        let shared = Arc::new(Shared {
            state: Mutex::new(ReconnectState::new(policy)),
            consumer: Mutex::new(None),
            shutdown: Notify::new(),
            chunk_sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        Self {
            url: url.into(),
            connector: Arc::new(connector),
            limits,
            handle: ConnectionHandle { shared, outbound },
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
        }
    }

    /// Target address.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cloneable sending handle.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Current link phase.
    pub fn phase(&self) -> LinkPhase {
        lock(&self.handle.shared.state).phase()
    }

    /// Whether the channel is currently open.
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Frames refused because the writer queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.handle.dropped_frames()
    }

    /// Establish the channel. Resolves once the transport is ready.
    ///
    /// A failure here is not retried; reconnection only covers channels that
    /// were open and dropped.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        {
            let mut state = lock(&self.handle.shared.state);
            match state.phase() {
                LinkPhase::Open => return Ok(()),
                LinkPhase::Closed => return Err(ConnectionError::Closed),
                LinkPhase::Exhausted => {
                    return Err(ConnectionError::Exhausted {
                        attempts: state.attempts(),
                    })
                }
                LinkPhase::Connecting | LinkPhase::Reconnecting => {
                    return Err(ConnectionError::ConnectFailed(
                        "connection attempt already in progress".into(),
                    ))
                }
                LinkPhase::Idle => {
                    state.begin_connect();
                }
            }
        }

        info!("Connecting to {}", self.url);

        let shared = &self.handle.shared;
        let attempt = open_link(self.connector.as_ref(), &self.url, &self.limits, shared).await;
        let mut link = match attempt {
            Some(Ok(link)) => link,
            Some(Err(e)) => {
                lock(&shared.state).on_initial_failure();
                error!("Failed to connect: {}", e);
                return Err(e);
            }
            None => return Err(ConnectionError::Closed),
        };

        let closed = {
            let mut state = lock(&shared.state);
            if state.is_closed() {
                true
            } else {
                state.on_connected();
                false
            }
        };
        if closed {
            close_sink(&mut link, &self.limits).await;
            return Err(ConnectionError::Closed);
        }

        let outbound_rx = lock(&self.outbound_rx).take();
        let Some(outbound_rx) = outbound_rx else {
            return Err(ConnectionError::ConnectFailed("link task already running".into()));
        };

        let task = tokio::spawn(run_link(
            link,
            self.connector.clone(),
            self.url.clone(),
            self.limits,
            shared.clone(),
            outbound_rx,
        ));
        *lock(&self.task) = Some(task);

        info!("Channel open");
        Ok(())
    }

    /// Best-effort control send. See [`ConnectionHandle::send_control`].
    pub fn send_control(&self, message: &ClientMessage) -> bool {
        self.handle.send_control(message)
    }

    /// Best-effort paired binary send. See [`ConnectionHandle::send_binary`].
    pub fn send_binary(&self, data: Vec<u8>) -> bool {
        self.handle.send_binary(data)
    }

    /// Register the inbound consumer, replacing any previous one.
    pub fn on_message(&self) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.handle.shared.consumer) = Some(tx);
        rx
    }

    /// Close intentionally. Suppresses reconnection and interrupts any
    /// in-flight attempt or write. Idempotent.
    pub fn close(&self) {
        {
            let mut state = lock(&self.handle.shared.state);
            if state.is_closed() {
                return;
            }
            state.close();
        }
        self.handle.shared.shutdown.notify_one();
        info!("Channel closed");
    }

    /// Wait for the background task to finish after [`close`](Self::close).
    pub async fn closed(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// LINK TASK
// =============================================================================

enum LinkEnd {
    Shutdown,
    Dropped,
}

/// One bounded connection attempt. `None` if `close()` interrupted it.
async fn open_link<C: Connector>(
    connector: &C,
    url: &str,
    limits: &LinkLimits,
    shared: &Shared,
) -> Option<Result<Link, ConnectionError>> {
    let attempt = tokio::time::timeout(limits.handshake_timeout, connector.connect(url));
    tokio::select! {
        result = attempt => Some(match result {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(e)) => Err(ConnectionError::ConnectFailed(e.to_string())),
            Err(_) => Err(ConnectionError::TimedOut(limits.handshake_timeout)),
        }),
        _ = shared.shutdown.notified() => None,
    }
}

async fn close_sink(link: &mut Link, limits: &LinkLimits) {
    if tokio::time::timeout(limits.write_timeout, link.sink.close())
        .await
        .is_err()
    {
        debug!("Close handshake timed out");
    }
}

async fn run_link<C: Connector>(
    mut link: Link,
    connector: Arc<C>,
    url: String,
    limits: LinkLimits,
    shared: Arc<Shared>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    loop {
        if let LinkEnd::Shutdown = pump(&mut link, &limits, &shared, &mut outbound).await {
            close_sink(&mut link, &limits).await;
            debug!("Link task finished");
            return;
        }

        match reconnect(connector.as_ref(), &url, &limits, &shared, &mut outbound).await {
            Some(next) => link = next,
            None => return,
        }
    }
}

async fn pump(
    link: &mut Link,
    limits: &LinkLimits,
    shared: &Shared,
    outbound: &mut mpsc::Receiver<Outbound>,
) -> LinkEnd {
    loop {
        // Frames accepted before close() are written before shutting down.
        tokio::select! {
            biased;
            out = outbound.recv() => {
                let Some(out) = out else {
                    return LinkEnd::Shutdown;
                };
                let writing = tokio::time::timeout(
                    limits.write_timeout,
                    write(link.sink.as_mut(), out),
                );
                let written = tokio::select! {
                    biased;
                    result = writing => result,
                    _ = shared.shutdown.notified() => return LinkEnd::Shutdown,
                };
                match written {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Send failed: {}", e);
                        return LinkEnd::Dropped;
                    }
                    Err(_) => {
                        warn!("Send stalled for {:?}, dropping link", limits.write_timeout);
                        return LinkEnd::Dropped;
                    }
                }
            }
            _ = shared.shutdown.notified() => return LinkEnd::Shutdown,
            frame = link.stream.next_frame() => match frame {
                Some(Ok(Frame::Text(text))) => match InboundMessage::parse(&text) {
                    Ok(message) => shared.deliver(message),
                    Err(e) => warn!("Dropping inbound message: {}", e),
                },
                Some(Ok(Frame::Binary(data))) => {
                    debug!("Ignoring {} byte inbound binary frame", data.len());
                }
                Some(Err(e)) => {
                    warn!("Channel error: {}", e);
                    return LinkEnd::Dropped;
                }
                None => {
                    info!("Channel closed by peer");
                    return LinkEnd::Dropped;
                }
            }
        }
    }
}

async fn write(sink: &mut dyn FrameSink, out: Outbound) -> Result<(), TransportError> {
    match out {
        Outbound::Control(text) => sink.send(Frame::Text(text)).await,
        Outbound::Binary { meta, data } => {
            sink.send(Frame::Text(meta)).await?;
            sink.send(Frame::Binary(data)).await
        }
    }
}

async fn reconnect<C: Connector>(
    connector: &C,
    url: &str,
    limits: &LinkLimits,
    shared: &Shared,
    outbound: &mut mpsc::Receiver<Outbound>,
) -> Option<Link> {
    loop {
        let decision = lock(&shared.state).on_disconnect();

        let mut discarded = 0usize;
        while outbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} unsent frames", discarded);
        }

        match decision {
            ReconnectDecision::Stop => return None,
            ReconnectDecision::GiveUp { attempts } => {
                error!("Reconnection exhausted after {} attempts", attempts);
                shared.deliver(InboundMessage::connection_exhausted(attempts));
                return None;
            }
            ReconnectDecision::Retry { attempt, delay } => {
                warn!("Reconnecting in {:?} (attempt {})", delay, attempt);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shared.shutdown.notified() => return None,
                }

                if !lock(&shared.state).begin_connect() {
                    return None;
                }

                match open_link(connector, url, limits, shared).await? {
                    Ok(mut link) => {
                        let closed = {
                            let mut state = lock(&shared.state);
                            if state.is_closed() {
                                true
                            } else {
                                state.on_connected();
                                false
                            }
                        };
                        if closed {
                            close_sink(&mut link, limits).await;
                            return None;
                        }
                        info!("Reconnected on attempt {}", attempt);
                        return Some(link);
                    }
                    Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
                }
            }
        }
    }
}
