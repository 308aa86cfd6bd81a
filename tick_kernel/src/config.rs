//! Kernel configuration
//!
//! Read from the store's `config` key at every boot. Missing fields take
//! their defaults; an unreadable document is reported and replaced by the
//! defaults rather than stopping the tick.

use core_types::Priority;
use resources::BudgetConfig;
use serde::{Deserialize, Serialize};
use storage::{Store, CONFIG_KEY};

/// What happens to the children of a process that exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Children are killed, recursively
    #[default]
    Kill,
    /// Children keep running with a dangling parent id
    Orphan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub default_process_priority: Priority,
    pub default_thread_priority: Priority,
    /// Horizon of the per-thread CPU moving averages, in samples
    pub cpu_stats_window: u32,
    /// CPU that must remain under the limit before another thread is started
    pub dispatch_margin: f64,
    /// Ticks a future may stay unresolved before its waiters time out
    pub future_timeout: u64,
    pub orphan_policy: OrphanPolicy,
    pub budget: BudgetConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            default_process_priority: Priority::DEFAULT,
            default_thread_priority: Priority::DEFAULT,
            cpu_stats_window: 50,
            dispatch_margin: 1.0,
            future_timeout: 1000,
            orphan_policy: OrphanPolicy::Kill,
            budget: BudgetConfig::default(),
        }
    }
}

impl KernelConfig {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            cpu_stats_window: self.cpu_stats_window.max(1),
            dispatch_margin: if self.dispatch_margin.is_finite() && self.dispatch_margin >= 0.0 {
                self.dispatch_margin
            } else {
                defaults.dispatch_margin
            },
            budget: self.budget.sanitized(),
            ..self
        }
    }

    /// Loads the configuration from `store`
    ///
    /// Returns the configuration to use and, when the stored document could
    /// not be used, the reason it was ignored.
    pub fn load(store: &dyn Store) -> (Self, Option<String>) {
        match store.load(CONFIG_KEY) {
            Ok(None) => (Self::default(), None),
            Ok(Some(raw)) => match serde_json::from_str::<KernelConfig>(&raw) {
                Ok(config) => (config.sanitized(), None),
                Err(err) => (Self::default(), Some(format!("Invalid kernel config: {}", err))),
            },
            Err(err) => (Self::default(), Some(format!("Kernel config unavailable: {}", err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStore;

    #[test]
    fn test_missing_config_uses_defaults() {
        let (config, warning) = KernelConfig::load(&MemoryStore::new());
        assert_eq!(config, KernelConfig::default());
        assert!(warning.is_none());
    }

    #[test]
    fn test_partial_config() {
        let mut store = MemoryStore::new();
        store
            .save(
                CONFIG_KEY,
                r#"{"future_timeout": 20, "orphan_policy": "orphan", "budget": {"critical_bucket": 100}}"#
                    .to_string(),
            )
            .unwrap();
        let (config, warning) = KernelConfig::load(&store);
        assert!(warning.is_none());
        assert_eq!(config.future_timeout, 20);
        assert_eq!(config.orphan_policy, OrphanPolicy::Orphan);
        assert_eq!(config.budget.critical_bucket, 100.0);
        assert_eq!(config.cpu_stats_window, 50);
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let mut store = MemoryStore::new();
        store.save(CONFIG_KEY, "{not json".to_string()).unwrap();
        let (config, warning) = KernelConfig::load(&store);
        assert_eq!(config, KernelConfig::default());
        assert!(warning.unwrap().starts_with("Invalid kernel config"));
    }

    #[test]
    fn test_sanitized_bounds() {
        let config = KernelConfig {
            cpu_stats_window: 0,
            dispatch_margin: -2.0,
            ..KernelConfig::default()
        }
        .sanitized();
        assert_eq!(config.cpu_stats_window, 1);
        assert_eq!(config.dispatch_margin, 1.0);
    }
}
