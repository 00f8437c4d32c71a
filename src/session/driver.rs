//! Verification Session Driver
//!
//! Wires the four components together for one verification attempt:
//!
//! ```text
//! MotionSampler ──samples──► ImuBatcher ──imu_batch──┐
//! MediaStreamer ──chunks──────────────video_chunk+bin─┼─► ConnectionManager ◄──► verifier
//! ChallengeController ──────────────phase_complete───┘            │
//!         │                                                       │ inbound
//!         └──phase changes──► SessionEvent ◄──────────────────────┘
//! ```
//!
//! Everything after setup runs in one `select!` loop, so phase timers,
//! sample batching and chunk forwarding never race each other.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::capture::capability::DeviceCapabilityChecker;
use crate::capture::media::{CameraDevice, MediaStreamer};
use crate::capture::motion::{MotionSampler, MotionSource, SamplerStatus};
use crate::challenge::controller::ChallengeController;
use crate::challenge::phase::PhaseChange;
use crate::core::clock::{Clock, MonotonicClock};
use crate::error::{CaptureError, SensorKind, SessionError};
use crate::network::connection::ConnectionManager;
use crate::network::protocol::InboundMessage;
use crate::network::transport::Connector;
use crate::session::batch::ImuBatcher;
use crate::session::config::SessionConfig;

/// Commands accepted while a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Tear down and finish with [`SessionOutcome::Aborted`].
    Abort,
    /// Clear phase timers and start again from `baseline`.
    Restart,
}

/// Events for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A phase was entered.
    PhaseChanged(PhaseChange),
    /// The verifier sent something other than a result or error.
    Inbound(InboundMessage),
    /// No motion events arrived in the grace window.
    MotionSilent,
    /// Reconnection was exhausted. Ask the user to restart.
    ConnectionLost,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The verifier sent its `result`.
    Completed(InboundMessage),
    /// An `error` arrived, from the verifier or from reconnection exhaustion.
    Failed(InboundMessage),
    /// Aborted on request.
    Aborted,
}

/// Cloneable control handle for a running session.
#[derive(Debug, Clone)]
pub struct SessionControl {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionControl {
    /// Abort the session.
    pub fn abort(&self) -> bool {
        self.commands.send(SessionCommand::Abort).is_ok()
    }

    /// Restart the challenge from `baseline`.
    pub fn restart(&self) -> bool {
        self.commands.send(SessionCommand::Restart).is_ok()
    }
}

/// One verification attempt.
pub struct VerificationSession<C: Connector> {
    config: SessionConfig,
    connector: C,
    checker: Arc<dyn DeviceCapabilityChecker>,
    motion: Arc<dyn MotionSource>,
    camera: Arc<dyn CameraDevice>,
    events: mpsc::UnboundedSender<SessionEvent>,
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
}

impl<C: Connector> VerificationSession<C> {
    /// Create a session and the receiver for its UI events.
    pub fn new(
        config: SessionConfig,
        connector: C,
        checker: Arc<dyn DeviceCapabilityChecker>,
        motion: Arc<dyn MotionSource>,
        camera: Arc<dyn CameraDevice>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            connector,
            checker,
            motion,
            camera,
            events,
            commands_tx,
            commands_rx,
        };
        (session, events_rx)
    }

    /// Control handle. Valid for the lifetime of [`run`](Self::run).
    pub fn control(&self) -> SessionControl {
        SessionControl {
            commands: self.commands_tx.clone(),
        }
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    /// Run setup, the challenge and teardown.
    ///
    /// Setup failures return `Err` before anything is sent.
    #[instrument(skip(self), fields(session_id = %self.config.session_id))]
    pub async fn run(self) -> Result<SessionOutcome, SessionError> {
        let Self {
            config,
            connector,
            checker,
            motion,
            camera,
            events,
            commands_tx: _commands_tx,
            mut commands_rx,
        } = self;
        let emit = |event: SessionEvent| {
            if events.send(event).is_err() {
                debug!("No session event listener");
            }
        };

        let report = checker.check().await;
        if !report.compatible {
            warn!("Device not compatible: {:?}", report.reasons);
            return Err(SessionError::Incompatible {
                reasons: report.reasons,
            });
        }

        let mut sampler = MotionSampler::new(motion, config.motion.clone());
        let mut samples = sampler.on_data();
        let mut sampler_status = sampler.status();
        if !sampler.request_access().await {
            return Err(CaptureError::PermissionDenied(SensorKind::Motion).into());
        }
        sampler.start().await?;

        let mut streamer = MediaStreamer::new(camera, config.media.clone());
        let mut chunks = streamer.on_chunk();
        streamer.initialize().await?;
        streamer.start()?;

        let connection =
            ConnectionManager::with_limits(config.url(), connector, config.reconnect, config.link);
        let mut inbound = connection.on_message();
        connection.connect().await?;

        // An abort sent during setup wins before any phase starts.
        if let Ok(SessionCommand::Abort) = commands_rx.try_recv() {
            info!("Session aborted during setup");
            connection.close();
            return Err(SessionError::Aborted);
        }

        let handle = connection.handle();
        let clock = MonotonicClock::new();
        let mut controller = ChallengeController::new(handle.clone());
        let mut phases = controller.on_phase_change();
        let mut batcher = ImuBatcher::new(config.motion.batch_size);

        controller.start_challenge(clock.now_ms());

        let outcome = loop {
            let deadline = controller.next_deadline();
            tokio::select! {
                _ = sleep_until(deadline.map(|d| clock.instant_at(d))) => {
                    let now = clock.now_ms().max(deadline.unwrap_or_default());
                    controller.advance(now);
                }
                Some(change) = phases.recv() => {
                    emit(SessionEvent::PhaseChanged(change));
                }
                Some(sample) = samples.recv() => {
                    if let Some(batch) = batcher.push(sample) {
                        handle.send_control(&batch);
                    }
                }
                Some(chunk) = chunks.recv() => {
                    handle.send_binary_at(chunk.data, chunk.produced_at);
                }
                Some(message) = inbound.recv() => {
                    if message.is_result() {
                        info!("Verification result received");
                        break SessionOutcome::Completed(message);
                    }
                    if message.is_error() {
                        warn!("Session failed: {:?}", message.get("message"));
                        let code = message.get("code").and_then(|c| c.as_str());
                        if code == Some("connection_exhausted") {
                            emit(SessionEvent::ConnectionLost);
                        }
                        break SessionOutcome::Failed(message);
                    }
                    emit(SessionEvent::Inbound(message));
                }
                Ok(()) = sampler_status.changed() => {
                    if *sampler_status.borrow_and_update() == SamplerStatus::Silent {
                        emit(SessionEvent::MotionSilent);
                    }
                }
                Some(command) = commands_rx.recv() => match command {
                    SessionCommand::Abort => {
                        info!("Session aborted");
                        break SessionOutcome::Aborted;
                    }
                    SessionCommand::Restart => {
                        info!("Restarting challenge");
                        controller.start_challenge(clock.now_ms());
                    }
                },
            }
        };

        controller.clear_timers();
        while let Ok(change) = phases.try_recv() {
            emit(SessionEvent::PhaseChanged(change));
        }
        if let Some(batch) = batcher.flush() {
            handle.send_control(&batch);
        }
        sampler.stop();
        streamer.stop();
        connection.close();
        connection.closed().await;

        let dropped = connection.dropped_frames();
        if dropped > 0 {
            warn!("{} outbound frames dropped on a backed-up channel", dropped);
        }
        info!("Session finished");
        Ok(outcome)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
