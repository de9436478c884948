//! Reload watcher: turns reload triggers into proxy sets for the orchestrator.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{messages::ProxySetSender, proxy_spec::build_proxy_specs},
    ports::ConfigProvider,
};

pub struct ConfigWatcher {
    provider: Arc<dyn ConfigProvider>,
    sender: ProxySetSender,
    cancel: CancellationToken,
}

impl ConfigWatcher {
    pub fn new(provider: Arc<dyn ConfigProvider>, sender: ProxySetSender, cancel: CancellationToken) -> Self {
        Self {
            provider,
            sender,
            cancel,
        }
    }

    /// Load once, then reload on every message from `reload` until cancelled.
    ///
    /// A failed initial load is reported and ends the watcher. Later failures are
    /// reported and the watcher keeps waiting for the next trigger. Returns when
    /// the token is cancelled, the trigger channel closes, or the orchestrator
    /// stops listening.
    pub async fn run(self, mut reload: mpsc::Receiver<()>) {
        tracing::info!(source = %self.provider.describe(), "loading configuration");
        if !self.load_and_emit(true).await {
            return;
        }

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                trigger = reload.recv() => {
                    if trigger.is_none() {
                        tracing::debug!("reload trigger channel closed");
                        break;
                    }
                    tracing::info!(source = %self.provider.describe(), "reloading configuration");
                    if !self.load_and_emit(false).await {
                        break;
                    }
                }
            }
        }

        tracing::debug!("config watcher stopped");
    }

    /// Returns whether the watcher should keep running.
    async fn load_and_emit(&self, initial: bool) -> bool {
        let delivered = match self.provider.load_config().await {
            Ok(config) => {
                let specs = build_proxy_specs(&config);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return false,
                    delivered = self.sender.send_proxy_set(specs) => delivered,
                }
            }
            Err(err) => {
                let delivered = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return false,
                    delivered = self.sender.send_error(err) => delivered,
                };
                if initial {
                    return false;
                }
                delivered
            }
        };

        if !delivered {
            tracing::debug!("orchestrator is gone, stopping config watcher");
        }
        delivered
    }
}
