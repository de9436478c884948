use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use eyre::{Result, WrapErr};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What an interrupt turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// First interrupt: drain and exit cleanly
    Graceful,
    /// Repeated interrupt: exit immediately
    Force,
}

type ForceExit = Box<dyn Fn() + Send + Sync>;

/// Translates OS signals into cancellation and reload triggers.
///
/// The first SIGINT/SIGTERM cancels the shared token; any further one calls the
/// force-exit hook, which by default terminates the process with status 1.
pub struct GracefulShutdown {
    token: CancellationToken,
    interrupts: AtomicUsize,
    force_exit: ForceExit,
}

impl GracefulShutdown {
    pub fn new(token: CancellationToken) -> Self {
        Self::with_force_exit(token, || std::process::exit(1))
    }

    /// Use a custom action for the forced exit instead of terminating the process
    pub fn with_force_exit(token: CancellationToken, force_exit: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            token,
            interrupts: AtomicUsize::new(0),
            force_exit: Box::new(force_exit),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle one interrupt.
    pub fn interrupt(&self) -> ShutdownReason {
        if self.interrupts.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::info!("shutdown signal received, press Ctrl+C again to force exit");
            self.token.cancel();
            ShutdownReason::Graceful
        } else {
            tracing::warn!("second shutdown signal received, forcing exit");
            (self.force_exit)();
            ShutdownReason::Force
        }
    }

    /// Listen for OS signals until the process ends.
    ///
    /// SIGINT and SIGTERM go through [`GracefulShutdown::interrupt`]; SIGUSR1 and
    /// SIGUSR2 push a reload trigger, dropped when one is already pending.
    #[cfg(unix)]
    pub async fn run_signal_handler(self: Arc<Self>, reload_tx: mpsc::Sender<()>) -> Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).wrap_err("Failed to register SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
        let mut sigusr1 =
            signal(SignalKind::user_defined1()).wrap_err("Failed to register SIGUSR1 handler")?;
        let mut sigusr2 =
            signal(SignalKind::user_defined2()).wrap_err("Failed to register SIGUSR2 handler")?;

        tracing::debug!("signal handler started: SIGINT/SIGTERM shut down, SIGUSR1/SIGUSR2 reload");

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::debug!("received SIGINT");
                    self.interrupt();
                }
                _ = sigterm.recv() => {
                    tracing::debug!("received SIGTERM");
                    self.interrupt();
                }
                _ = sigusr1.recv() => request_reload(&reload_tx, "SIGUSR1"),
                _ = sigusr2.recv() => request_reload(&reload_tx, "SIGUSR2"),
            }
        }
    }

    #[cfg(not(unix))]
    pub async fn run_signal_handler(self: Arc<Self>, _reload_tx: mpsc::Sender<()>) -> Result<()> {
        loop {
            tokio::signal::ctrl_c()
                .await
                .wrap_err("Failed to listen for Ctrl+C")?;
            self.interrupt();
        }
    }
}

#[cfg(unix)]
fn request_reload(reload_tx: &mpsc::Sender<()>, signal: &str) {
    tracing::info!("received {}, reloading configuration", signal);
    if let Err(mpsc::error::TrySendError::Closed(())) = reload_tx.try_send(()) {
        tracing::warn!("reload requested but the config watcher is not running");
    }
}
