//! Channel between the reload watcher and the orchestrator.
use tokio::sync::mpsc;

use crate::{config::ConfigError, core::proxy_spec::ProxySpec};

/// One outcome of a configuration load.
#[derive(Debug)]
pub enum ProxySetUpdate {
    /// A validated configuration, ready to be started
    Refresh(Vec<ProxySpec>),
    /// The configuration could not be loaded
    LoadFailed(ConfigError),
}

/// Watcher side: emits freshly built proxy sets and load failures.
#[derive(Clone)]
pub struct ProxySetSender {
    tx: mpsc::Sender<ProxySetUpdate>,
}

/// Orchestrator side of [`ProxySetSender`].
pub struct ProxySetInbox {
    rx: mpsc::Receiver<ProxySetUpdate>,
}

/// Create a connected sender/inbox pair.
///
/// Sets and errors share one queue, so the orchestrator sees them in the order
/// the watcher produced them. Capacity is a single message so the watcher cannot
/// get ahead of the orchestrator by more than one result.
pub fn proxy_set_channel() -> (ProxySetSender, ProxySetInbox) {
    let (tx, rx) = mpsc::channel(1);
    (ProxySetSender { tx }, ProxySetInbox { rx })
}

impl ProxySetSender {
    /// Returns `false` if the orchestrator is gone.
    pub async fn send_proxy_set(&self, specs: Vec<ProxySpec>) -> bool {
        self.tx.send(ProxySetUpdate::Refresh(specs)).await.is_ok()
    }

    /// Returns `false` if the orchestrator is gone.
    pub async fn send_error(&self, error: ConfigError) -> bool {
        self.tx.send(ProxySetUpdate::LoadFailed(error)).await.is_ok()
    }
}

impl ProxySetInbox {
    /// Next update, or `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<ProxySetUpdate> {
        self.rx.recv().await
    }
}
