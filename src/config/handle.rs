//! Shared, hot-swappable configuration.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::{GuardConfig, PolicyConfig};

/// Live configuration shared by every resilience component.
///
/// Components read the effective policy on each decision, so a `replace`
/// takes effect on the next call without rebuilding any state.
#[derive(Debug)]
pub struct ConfigHandle {
    current: ArcSwap<GuardConfig>,
}

impl ConfigHandle {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
        }
    }

    /// Snapshot of the whole configuration.
    pub fn load(&self) -> Arc<GuardConfig> {
        self.current.load_full()
    }

    /// Effective policy for one dependency.
    pub fn policy_for(&self, dependency: &str) -> PolicyConfig {
        self.current.load().policy_for(dependency)
    }

    /// Atomically swap in a new configuration.
    pub fn replace(&self, config: GuardConfig) {
        self.current.store(Arc::new(config));
        tracing::info!("Resilience configuration replaced");
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}
