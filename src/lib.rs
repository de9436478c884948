//! simple-proxy - a declarative TCP reverse proxy.
//!
//! The proxy reads an HCL file of `listen` blocks, validates it, and keeps a set of
//! TCP listeners in sync with it across reloads and shutdown requests. Each listener
//! either forwards every connection to one backend or picks a backend per connection
//! from the HTTP `Host` header or the TLS SNI server name.
//!
//! # Architecture
//! The crate follows a ports and adapters layout:
//! - [`config`] parses and validates the configuration file
//! - [`core`] holds the lifecycle orchestrator, the proxy set builder and the reload watcher
//! - [`ports`] defines the traits the core consumes (proxying engine, config source)
//! - [`adapters`] implements them with tokio sockets and the local file system
//!
//! # Lifecycle
//! A reload starts a complete new listener set before the old one is touched. If any
//! listener of the candidate fails to start the candidate is closed again and the
//! previous set keeps serving. Retired sets are drained in the background; connections
//! that are already open are never cut by a reload.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use simple_proxy::{
//!     adapters::{EngineOptions, FileConfigProvider, TcpProxyEngine},
//!     core::{ConfigWatcher, Orchestrator, proxy_set_channel},
//! };
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cancel = CancellationToken::new();
//! let (_reload_tx, reload_rx) = mpsc::channel(1);
//! let (sender, inbox) = proxy_set_channel();
//!
//! let watcher = ConfigWatcher::new(
//!     Arc::new(FileConfigProvider::new("proxy.hcl")),
//!     sender,
//!     cancel.clone(),
//! );
//! tokio::spawn(watcher.run(reload_rx));
//!
//! let engine = Arc::new(TcpProxyEngine::new(EngineOptions::default()));
//! Orchestrator::new(engine, inbox, cancel).run().await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Library APIs return domain error types built with `thiserror`; the binary wraps them
//! in `eyre` reports.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{EngineOptions, FileConfigProvider, TcpProxyEngine},
    config::{Config, ConfigError},
    core::{ConfigWatcher, LifecycleState, Orchestrator, OrchestratorError},
    utils::GracefulShutdown,
};
