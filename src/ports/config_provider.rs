use async_trait::async_trait;

use crate::config::{Config, ConfigError};

/// Trait for configuration sources the reload watcher reads from.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load and validate the current configuration.
    async fn load_config(&self) -> Result<Config, ConfigError>;

    /// Human readable description of the source, used in logs
    fn describe(&self) -> String;
}
