//! Lifecycle orchestrator.
//!
//! Owns the active [`ProxySet`] and serializes every change to it through a single
//! select loop over two inputs: watcher updates (new proxy sets and load errors,
//! in the order they were produced) and the shutdown token.
//!
//! ```text
//!   Empty ──▶ Starting ──▶ Active ──▶ Draining ──▶ Terminated
//!               │  ▲          │
//!   (rollback)  ▼  └──────────┘ (reload)
//!   previous state
//! ```
//!
//! A candidate set is only published once every one of its listeners started.
//! The set it replaces is drained on a background task tracked by a
//! [`TaskTracker`], so a slow backend can never hold up the next reload.
use std::{fmt, sync::Arc};

use thiserror::Error;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

use crate::{
    config::ConfigError,
    core::{
        messages::{ProxySetInbox, ProxySetUpdate},
        proxy_set::{ListenerStartError, ProxySet},
        proxy_spec::ProxySpec,
    },
    ports::ProxyEngine,
    tracing_setup::lifecycle_span,
};

/// Where the orchestrator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No proxy set has been started yet
    Empty,
    /// A candidate set is being started
    Starting,
    /// A proxy set is serving traffic
    Active,
    /// The active set is being closed during shutdown
    Draining,
    /// Shutdown finished
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Failures that stop the orchestrator. Both can only happen before any
/// configuration was successfully applied.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("initial configuration could not be loaded")]
    InitialLoad(#[source] ConfigError),

    #[error("failed to start listeners from the initial configuration")]
    InitialStart(#[source] ListenerStartError),
}

pub struct Orchestrator {
    engine: Arc<dyn ProxyEngine>,
    inbox: ProxySetInbox,
    cancel: CancellationToken,
    active: Option<ProxySet>,
    state: LifecycleState,
    next_generation: u64,
    drains: TaskTracker,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ProxyEngine>, inbox: ProxySetInbox, cancel: CancellationToken) -> Self {
        Self {
            engine,
            inbox,
            cancel,
            active: None,
            state: LifecycleState::Empty,
            next_generation: 1,
            drains: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Generation number of the set currently serving traffic
    pub fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(ProxySet::generation)
    }

    pub fn active_addresses(&self) -> Vec<String> {
        self.active
            .as_ref()
            .map(ProxySet::addresses)
            .unwrap_or_default()
    }

    /// Number of retired sets still being drained
    pub fn pending_drains(&self) -> usize {
        self.drains.len()
    }

    /// Wait until every retired set handed to the background drain has closed.
    pub async fn wait_for_drains(&self) {
        self.drains.close();
        self.drains.wait().await;
        self.drains.reopen();
    }

    /// Start `specs` as a new generation and make it active, or roll back.
    ///
    /// On success returns the new generation number. On failure the started part
    /// of the candidate has been closed again and the previous set is untouched.
    pub async fn apply_proxy_set(&mut self, specs: Vec<ProxySpec>) -> Result<u64, ListenerStartError> {
        let generation = self.next_generation;
        self.next_generation += 1;

        self.swap_in(generation, specs)
            .instrument(lifecycle_span(generation))
            .await
    }

    async fn swap_in(&mut self, generation: u64, specs: Vec<ProxySpec>) -> Result<u64, ListenerStartError> {
        let previous_state = self.state;
        self.transition(LifecycleState::Starting);

        let instances = specs.iter().map(|spec| self.engine.create(spec)).collect();
        let mut candidate = ProxySet::new(generation, instances);

        if let Err(err) = candidate.start_all() {
            tracing::error!(
                "failed to start listeners from new configuration. Keeping last known good configuration.\n{}",
                err
            );
            candidate.close_all().await;
            self.transition(previous_state);
            return Err(err);
        }

        tracing::info!(
            "all {} listeners from new configuration are online",
            candidate.len()
        );

        let retired = self.active.replace(candidate);
        self.transition(LifecycleState::Active);

        if let Some(retired) = retired {
            let span = lifecycle_span(retired.generation());
            self.drains.spawn(retired.close_all().instrument(span));
        }

        Ok(generation)
    }

    /// A reload could not produce a configuration; keep serving what we have.
    pub fn on_load_error(&self, err: &ConfigError) {
        tracing::error!("failed to load configuration. {}", err);
    }

    /// Close the active set, wait for outstanding drains and terminate.
    pub async fn shutdown(&mut self) {
        self.transition(LifecycleState::Draining);

        if let Some(active) = self.active.take() {
            let span = lifecycle_span(active.generation());
            active.close_all().instrument(span).await;
        }
        self.wait_for_drains().await;

        self.transition(LifecycleState::Terminated);
    }

    /// Run until the cancellation token fires.
    ///
    /// Returns an error only when the very first configuration could not be loaded
    /// or started; every later failure is logged and the active set keeps serving.
    pub async fn run(mut self) -> Result<(), OrchestratorError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!("shutdown requested. closing all proxy listeners and exiting...");
                    self.shutdown().await;
                    return Ok(());
                }

                Some(update) = self.inbox.recv() => match update {
                    ProxySetUpdate::Refresh(specs) => {
                        let had_active = self.active.is_some();
                        if let Err(err) = self.apply_proxy_set(specs).await {
                            if !had_active {
                                self.shutdown().await;
                                return Err(OrchestratorError::InitialStart(err));
                            }
                        }
                    }
                    ProxySetUpdate::LoadFailed(err) => {
                        self.on_load_error(&err);
                        if self.active.is_none() {
                            self.shutdown().await;
                            return Err(OrchestratorError::InitialLoad(err));
                        }
                    }
                },
            }
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            tracing::debug!("lifecycle state {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("active", &self.active)
            .field("pending_drains", &self.drains.len())
            .finish()
    }
}
