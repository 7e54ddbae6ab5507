//! Hot reload of the configuration file into a live `ConfigHandle`.
//!
//! # Design Decisions
//! - A reload that fails to parse or validate leaves the running policies untouched
//! - Each accepted reload logs the dependencies whose effective policy changed

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::handle::ConfigHandle;
use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::GuardConfig;

/// Scope reported when the shared defaults change.
pub const DEFAULTS_SCOPE: &str = "defaults";

/// Keeps a `ConfigHandle` in sync with a file on disk.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    handle: Arc<ConfigHandle>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, handle: Arc<ConfigHandle>) -> Self {
        Self {
            path: path.to_path_buf(),
            handle,
        }
    }

    /// Load the file and swap it in if valid.
    ///
    /// Returns the scopes whose effective policy changed.
    pub fn reload(&self) -> Result<Vec<String>, ConfigError> {
        let next = load_config(&self.path)?;
        let changed = changed_policies(&self.handle.load(), &next);
        self.handle.replace(next);

        if changed.is_empty() {
            tracing::debug!(path = ?self.path, "Config reloaded, no policy changes");
        }
        for scope in &changed {
            tracing::info!(path = ?self.path, scope = %scope, "Policy changed");
        }
        Ok(changed)
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let reloader = self.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Err(e) = reloader.reload() {
                        tracing::error!(
                            path = ?reloader.path,
                            error = %e,
                            "Rejected config reload, keeping current policies"
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default(),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

/// Scopes whose effective policy differs between two configurations:
/// `defaults` plus every dependency key named by either side.
pub fn changed_policies(current: &GuardConfig, next: &GuardConfig) -> Vec<String> {
    let mut changed = Vec::new();
    if current.defaults != next.defaults {
        changed.push(DEFAULTS_SCOPE.to_string());
    }

    let keys: BTreeSet<&String> = current
        .dependencies
        .keys()
        .chain(next.dependencies.keys())
        .collect();
    changed.extend(
        keys.into_iter()
            .filter(|key| current.policy_for(key) != next.policy_for(key))
            .cloned(),
    );
    changed
}
