//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP never shuts down; reloads come from the file watcher, so it
//!   is only logged

use std::io;

/// What a received signal asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Shutdown,
    Reload,
}

/// Wait for the next shutdown signal. SIGHUP is logged and waiting resumes.
pub async fn wait_for_shutdown() -> io::Result<()> {
    loop {
        match next_signal().await? {
            SignalEvent::Shutdown => return Ok(()),
            SignalEvent::Reload => {
                tracing::info!("SIGHUP received; configuration reloads follow file changes")
            }
        }
    }
}

#[cfg(unix)]
async fn next_signal() -> io::Result<SignalEvent> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("SIGINT received");
            Ok(SignalEvent::Shutdown)
        }
        _ = terminate.recv() => {
            tracing::info!("SIGTERM received");
            Ok(SignalEvent::Shutdown)
        }
        _ = hangup.recv() => Ok(SignalEvent::Reload),
    }
}

#[cfg(not(unix))]
async fn next_signal() -> io::Result<SignalEvent> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl+C received");
    Ok(SignalEvent::Shutdown)
}
