use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{Config, ConfigError, loader::load_config},
    ports::config_provider::ConfigProvider,
};

/// Configuration provider that reads an HCL file from disk, optionally
/// turning changes to that file into reload triggers.
pub struct FileConfigProvider {
    path: PathBuf,
    // Kept alive for as long as the provider; dropping it stops the watch
    _watcher: Option<notify::RecommendedWatcher>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _watcher: None,
        }
    }

    /// Like [`FileConfigProvider::new`], and also send on `reload_tx` whenever the
    /// file is created, modified or removed.
    pub fn watching(path: impl Into<PathBuf>, reload_tx: mpsc::Sender<()>) -> Result<Self> {
        let mut provider = Self::new(path);
        provider.init_watcher(reload_tx)?;
        Ok(provider)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_watcher(&mut self, reload_tx: mpsc::Sender<()>) -> Result<()> {
        let config_filename = self
            .path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid config path: {}", self.path.display()))?
            .to_owned();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if (event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(&config_filename))
                    {
                        tracing::debug!("Config file changed: {:?}", event.kind);
                        // A pending trigger already covers this change
                        let _ = reload_tx.try_send(());
                    }
                }
                Err(e) => tracing::error!("File watch error: {:?}", e),
            }
        })?;

        let watch_dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("Failed to watch config directory")?;

        self._watcher = Some(watcher);
        Ok(())
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<Config, ConfigError> {
        load_config(&self.path).await
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
