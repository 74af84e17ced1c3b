//! Shutdown signal handling.
//!
//! The first SIGTERM or SIGINT starts draining: the webhook stops accepting
//! connections and in-flight batches run to completion (bounded by the batch
//! timeout). A second signal while draining forces an immediate exit.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Where the process is in its shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    /// Serving notifications.
    Running,
    /// No new connections; in-flight batches finish.
    Draining,
    /// Stop now, abandoning in-flight batches.
    Forced,
}

/// Listens for termination signals and fans the shutdown phase out to waiters.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    phase_tx: Arc<watch::Sender<ShutdownPhase>>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    pub fn new() -> Self {
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            phase_tx: Arc::new(phase_tx),
        }
    }

    /// Spawns the task that turns SIGTERM/SIGINT into phase changes.
    #[cfg(unix)]
    pub fn spawn_listener(&self) {
        let handler = self.clone();

        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        error!(error = %e, "failed to install signal handlers");
                        return;
                    }
                };

            loop {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                };
                if handler.escalate(name) == ShutdownPhase::Forced {
                    break;
                }
            }
            debug!("signal listener stopped");
        });
    }

    /// Spawns the task that turns Ctrl+C into phase changes.
    #[cfg(not(unix))]
    pub fn spawn_listener(&self) {
        let handler = self.clone();

        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if handler.escalate("Ctrl+C") == ShutdownPhase::Forced {
                    break;
                }
            }
        });
    }

    /// Moves one phase further and returns the new phase.
    fn escalate(&self, signal: &str) -> ShutdownPhase {
        let mut next = ShutdownPhase::Running;
        self.phase_tx.send_modify(|phase| {
            *phase = match *phase {
                ShutdownPhase::Running => ShutdownPhase::Draining,
                _ => ShutdownPhase::Forced,
            };
            next = *phase;
        });
        match next {
            ShutdownPhase::Draining => {
                info!(signal, "draining in-flight batches; signal again to force exit")
            }
            _ => warn!(signal, "forcing shutdown"),
        }
        next
    }

    /// Completes once draining starts.
    pub fn shutdown(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.phase_tx.subscribe(),
            phase: ShutdownPhase::Draining,
        }
    }

    /// Completes once shutdown is forced.
    pub fn forced(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.phase_tx.subscribe(),
            phase: ShutdownPhase::Forced,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Returns true once draining has started.
    pub fn is_shutdown(&self) -> bool {
        self.phase() >= ShutdownPhase::Draining
    }

    /// Starts draining without a signal.
    pub fn trigger_shutdown(&self) {
        self.phase_tx.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Draining;
                true
            } else {
                false
            }
        });
    }
}

/// Completes when the shutdown reaches a given phase.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<ShutdownPhase>,
    phase: ShutdownPhase,
}

impl ShutdownSignal {
    pub async fn wait(mut self) {
        let phase = self.phase;
        // The handler owns the sender, so an error here means it is gone.
        let _ = self.rx.wait_for(|current| *current >= phase).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_starts_draining() {
        let handler = SignalHandler::new();
        assert!(!handler.is_shutdown());

        handler.trigger_shutdown();
        assert!(handler.is_shutdown());
        assert_eq!(handler.phase(), ShutdownPhase::Draining);

        // Triggering again does not force.
        handler.trigger_shutdown();
        assert_eq!(handler.phase(), ShutdownPhase::Draining);
    }

    #[tokio::test]
    async fn second_signal_forces() {
        let handler = SignalHandler::new();
        assert_eq!(handler.escalate("SIGTERM"), ShutdownPhase::Draining);
        assert_eq!(handler.escalate("SIGINT"), ShutdownPhase::Forced);
        assert_eq!(handler.escalate("SIGINT"), ShutdownPhase::Forced);
    }

    #[tokio::test]
    async fn shutdown_signal_wait() {
        let handler = SignalHandler::new();
        let shutdown = handler.shutdown();

        let trigger = handler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger_shutdown();
        });

        let result = tokio::time::timeout(Duration::from_millis(500), shutdown.wait()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn forced_waits_for_second_signal() {
        let handler = SignalHandler::new();
        handler.trigger_shutdown();

        let forced = tokio::time::timeout(Duration::from_millis(20), handler.forced().wait()).await;
        assert!(forced.is_err());

        handler.escalate("SIGINT");
        let forced = tokio::time::timeout(Duration::from_millis(50), handler.forced().wait()).await;
        assert!(forced.is_ok());
    }

    #[tokio::test]
    async fn signal_created_after_trigger_completes() {
        let handler = SignalHandler::new();
        handler.trigger_shutdown();

        let result = tokio::time::timeout(Duration::from_millis(50), handler.shutdown().wait()).await;
        assert!(result.is_ok());
    }
}
