//! Configuration file watcher for hot reload.
//!
//! Only the capture settings are applied live; everything else needs a
//! restart and a warning is logged when it changed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

/// Watches a config file and pushes freshly validated configs to a channel.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for reloaded configs.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, updates } = self;
        let target = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }

                match load_config(&target) {
                    Ok(config) => {
                        tracing::info!(path = ?target, "Config reloaded");
                        let _ = updates.send(config);
                    }
                    Err(e) => {
                        tracing::error!(path = ?target, error = %e, "Rejected config reload, keeping current settings");
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
