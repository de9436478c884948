//! A generation of started listener instances.
use std::fmt;

use thiserror::Error;

use crate::ports::{EngineError, ProxyInstance};

/// Every start failure of one candidate set, reported together.
#[derive(Debug, Error)]
#[error("{}", join_lines(.failures))]
pub struct ListenerStartError {
    failures: Vec<EngineError>,
}

impl ListenerStartError {
    pub fn failures(&self) -> &[EngineError] {
        &self.failures
    }
}

fn join_lines(failures: &[EngineError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

struct Slot {
    instance: Box<dyn ProxyInstance>,
    started: bool,
}

/// Listener instances built from one configuration, in configuration order.
pub struct ProxySet {
    generation: u64,
    slots: Vec<Slot>,
}

impl ProxySet {
    pub fn new(generation: u64, instances: Vec<Box<dyn ProxyInstance>>) -> Self {
        Self {
            generation,
            slots: instances
                .into_iter()
                .map(|instance| Slot {
                    instance,
                    started: false,
                })
                .collect(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.instance.address().to_string())
            .collect()
    }

    /// Start every instance, continuing past failures so all of them get reported.
    pub fn start_all(&mut self) -> Result<(), ListenerStartError> {
        let mut failures = Vec::new();
        for slot in &mut self.slots {
            match slot.instance.start() {
                Ok(()) => {
                    slot.started = true;
                    tracing::debug!(address = slot.instance.address(), "listener started");
                }
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ListenerStartError { failures })
        }
    }

    /// Close every started instance, then wait for each accept loop to exit.
    ///
    /// Close errors are logged and swallowed; the benign "closed" outcome is not logged at all.
    pub async fn close_all(self) {
        let mut started: Vec<_> = self
            .slots
            .into_iter()
            .filter(|slot| slot.started)
            .map(|slot| slot.instance)
            .collect();
        if started.is_empty() {
            return;
        }

        tracing::info!(
            generation = self.generation,
            "shutting down {} listeners",
            started.len()
        );

        for instance in &started {
            instance.close();
        }

        for instance in &mut started {
            match instance.wait().await {
                Ok(()) => {}
                Err(e) if e.is_benign() => {
                    tracing::debug!(address = instance.address(), "listener closed");
                }
                Err(e) => {
                    tracing::error!("proxy listener closed with an error: {}", e);
                }
            }
        }
    }
}

impl fmt::Debug for ProxySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySet")
            .field("generation", &self.generation)
            .field("addresses", &self.addresses())
            .finish()
    }
}
