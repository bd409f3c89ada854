//! Daemon lifecycle: wiring, signal handling, graceful shutdown.
//!
//! The daemon connects the pieces: one session task owning the connection
//! and the registry writes, N search worker threads reading the registry,
//! and an event logger. Shutdown order matters: the session stops first so
//! no more jobs arrive, then the registry close wakes and stops the
//! workers.

use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::config::PoolConfig;
use crate::stratum::{Session, SessionEvent};
use crate::trace::prelude::*;
use crate::work::JobRegistry;
use crate::worker;

/// Coordinates the session, workers, and shutdown.
pub struct Daemon {
    config: PoolConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run until the session ends or a termination signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        let registry = JobRegistry::new();
        let (share_tx, share_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let workers = worker::spawn(
            self.config.workers,
            self.config.batch_size,
            registry.clone(),
            share_tx,
        );

        let session = Session::new(
            self.config.clone(),
            registry.clone(),
            event_tx,
            share_rx,
            self.shutdown.clone(),
        );

        // The session ending for any reason ends the daemon; reconnect
        // policy belongs to whoever restarts the process.
        self.tracker.spawn({
            let shutdown = self.shutdown.clone();
            async move {
                match session.run().await {
                    Ok(()) => info!("session closed"),
                    Err(e) => error!(error = %e, "session ended"),
                }
                shutdown.cancel();
            }
        });

        self.tracker.spawn(log_events(event_rx));
        self.tracker.close();

        info!(
            host = %self.config.host,
            port = self.config.port,
            username = %self.config.username,
            "started"
        );

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = self.shutdown.cancelled() => {}
        }

        trace!("shutting down");
        self.shutdown.cancel();
        self.tracker.wait().await;

        registry.close();
        tokio::task::spawn_blocking(move || workers.join()).await?;

        info!("exiting");
        Ok(())
    }
}

/// Log session events as they arrive.
async fn log_events(mut event_rx: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            SessionEvent::Ready { subscription_id } => {
                info!(subscription_id = %subscription_id, "mining")
            }
            SessionEvent::JobInstalled {
                generation,
                job_id,
                clean_jobs,
            } => debug!(generation, job_id = %job_id, clean_jobs, "new work"),
            SessionEvent::DifficultyChanged(difficulty) => debug!(difficulty, "retargeted"),
            SessionEvent::ShareAccepted { job_id } => info!(job_id = %job_id, "share accepted"),
            SessionEvent::ShareRejected { job_id, reason } => {
                warn!(job_id = %job_id, reason = %reason, "share rejected")
            }
            SessionEvent::Disconnected => info!("disconnected from pool"),
        }
    }
}
