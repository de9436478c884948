use async_trait::async_trait;
use thiserror::Error;

use crate::core::proxy_spec::ProxySpec;

/// Errors reported by a proxying engine instance.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// The listen address could not be resolved to a socket address
    #[error("failed to resolve listen address {address}: {reason}")]
    Resolve { address: String, reason: String },

    /// Binding or listening on the socket failed (e.g. port in use)
    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// `start` was called on an instance that is already running
    #[error("listener {address} already started")]
    AlreadyStarted { address: String },

    /// The accept loop stopped because of a socket error
    #[error("listener {address} stopped accepting: {source}")]
    Accept {
        address: String,
        source: std::io::Error,
    },

    /// The listener was closed while being waited on
    #[error("listener {address} closed")]
    Closed { address: String },

    /// The accept loop task panicked or was aborted
    #[error("listener {address} task failed: {message}")]
    Task { address: String, message: String },
}

impl EngineError {
    /// The expected outcome of waiting on a listener that was closed on purpose.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// A single listener managed by the engine.
///
/// `close` may be called any number of times and from any state; `wait` resolves
/// once the accept loop has fully exited.
#[async_trait]
pub trait ProxyInstance: Send + Sync + 'static {
    /// The address this instance listens on, as configured
    fn address(&self) -> &str;

    /// Bind the socket and start accepting connections
    fn start(&mut self) -> Result<(), EngineError>;

    /// Stop accepting new connections. Never fails.
    fn close(&self);

    /// Wait for the accept loop to exit.
    ///
    /// Returns [`EngineError::Closed`] when the only reason for stopping was `close`.
    async fn wait(&mut self) -> Result<(), EngineError>;
}

/// ProxyEngine defines the port for creating listener instances
pub trait ProxyEngine: Send + Sync + 'static {
    /// Create an unstarted instance for `spec`
    fn create(&self, spec: &ProxySpec) -> Box<dyn ProxyInstance>;
}
