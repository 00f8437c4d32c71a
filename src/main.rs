//! Pan & Return Client
//!
//! Runs one verification session against the configured verifier using
//! simulated motion sensors and a simulated camera.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pan_return::{
    capture::{SimulatedCamera, SimulatedMotionSource, StaticCapabilityChecker},
    network::WsConnector,
    SessionConfig, SessionEvent, SessionOutcome, VerificationSession, VERSION,
};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Pan & Return Client v{}", VERSION);

    let config = SessionConfig::from_env();
    info!("Session: {}", config.session_id);
    info!("Verifier: {}", config.url());

    run_session(config).await
}

/// Run one session with simulated devices and log what happens.
async fn run_session(config: SessionConfig) -> anyhow::Result<()> {
    let (session, mut events) = VerificationSession::new(
        config,
        WsConnector,
        Arc::new(StaticCapabilityChecker::capable(std::env::consts::OS)),
        Arc::new(SimulatedMotionSource::default()),
        Arc::new(SimulatedCamera::default()),
    );
    let control = session.control();

    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::PhaseChanged(change) => {
                    info!("== {} == {}", change.title, change.instruction);
                }
                SessionEvent::Inbound(message) => info!("Verifier: {}", message.kind),
                SessionEvent::MotionSilent => warn!("Motion sensors are silent"),
                SessionEvent::ConnectionLost => {
                    warn!("Connection lost. Please restart the session.")
                }
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, aborting session");
            control.abort();
        }
    });

    let outcome = tokio::spawn(session.run()).await??;

    match &outcome {
        SessionOutcome::Completed(result) => {
            info!("Verification complete: {}", result.to_json()?);
        }
        SessionOutcome::Failed(error) => warn!("Verification failed: {}", error.to_json()?),
        SessionOutcome::Aborted => info!("Verification aborted"),
    }

    reporter.abort();
    Ok(())
}
