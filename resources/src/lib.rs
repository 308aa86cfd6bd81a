//! # Resources
//!
//! The CPU budget gate consulted by the dispatch loop.
//!
//! ## Philosophy
//!
//! - **The host owns the clock**: the gate reads the host's CPU counter and
//!   never keeps a counter of its own
//! - **Budgets are enforced at dispatch, not mid-slice**: there is no
//!   preemption, so the gate can only refuse to start more work
//! - **Degrade, don't fail**: a low reserve lowers the ceiling and, when it is
//!   critically low, restricts dispatch to high-priority processes
//!
//! ## Core Concepts
//!
//! - `BudgetConfig`: thresholds that decide when to throttle
//! - `BudgetMode`: `Normal`, `Throttled` or `Critical`
//! - `BudgetGate`: the per-tick view of used/limit/remaining CPU

use core_types::Priority;
use kernel_api::HostApi;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Thresholds for throttling, in host CPU units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Below this reserve the effective limit is scaled down
    pub throttle_bucket: f64,
    /// Below this reserve only high-priority processes are dispatched
    pub critical_bucket: f64,
    /// Lowest fraction of the nominal limit a throttled tick may use
    pub min_throttle_ratio: f64,
    /// Processes with a priority value above this are skipped in critical mode
    pub critical_priority: Priority,
}

impl BudgetConfig {
    /// Returns a copy with every threshold forced into a usable range
    pub fn sanitized(self) -> Self {
        let throttle_bucket = non_negative(self.throttle_bucket, Self::default().throttle_bucket);
        let critical_bucket =
            non_negative(self.critical_bucket, Self::default().critical_bucket).min(throttle_bucket);
        let min_throttle_ratio = if self.min_throttle_ratio.is_finite() {
            self.min_throttle_ratio.clamp(0.0, 1.0)
        } else {
            Self::default().min_throttle_ratio
        };
        Self {
            throttle_bucket,
            critical_bucket,
            min_throttle_ratio,
            critical_priority: self.critical_priority,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            throttle_bucket: 2000.0,
            critical_bucket: 500.0,
            min_throttle_ratio: 0.2,
            critical_priority: Priority::HIGH,
        }
    }
}

fn non_negative(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        fallback
    }
}

/// How much of the nominal allowance this tick may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetMode {
    /// Reserve is healthy; the nominal limit applies
    Normal,
    /// Reserve is low; the limit is scaled down
    Throttled,
    /// Reserve is nearly exhausted; only high-priority work runs
    Critical,
}

impl fmt::Display for BudgetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetMode::Normal => write!(f, "normal"),
            BudgetMode::Throttled => write!(f, "throttled"),
            BudgetMode::Critical => write!(f, "critical"),
        }
    }
}

/// Point-in-time copy of the gate, suitable for reports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub used: f64,
    pub limit: f64,
    pub bucket: f64,
    pub mode: BudgetMode,
}

/// Per-tick CPU budget gate
///
/// The limit and mode are fixed when the gate is created at the start of the
/// tick; `used` is read live from the host on every call.
pub struct BudgetGate<'h> {
    host: &'h dyn HostApi,
    config: BudgetConfig,
    bucket: f64,
    limit: f64,
    mode: BudgetMode,
}

impl<'h> BudgetGate<'h> {
    pub fn new(host: &'h dyn HostApi, config: BudgetConfig) -> Self {
        let config = config.sanitized();
        let bucket = host.bucket();
        let nominal = host.cpu_limit().max(0.0);
        let hard = host.tick_limit().max(0.0);

        let (scaled, mode) = if bucket < config.throttle_bucket {
            let ratio = if config.throttle_bucket > 0.0 {
                (bucket / config.throttle_bucket).max(config.min_throttle_ratio)
            } else {
                1.0
            };
            let mode = if bucket < config.critical_bucket {
                BudgetMode::Critical
            } else {
                BudgetMode::Throttled
            };
            (nominal * ratio.min(1.0), mode)
        } else {
            (nominal, BudgetMode::Normal)
        };

        Self {
            host,
            config,
            bucket,
            limit: scaled.min(hard),
            mode,
        }
    }

    /// CPU consumed so far this tick
    pub fn used(&self) -> f64 {
        self.host.cpu_used()
    }

    /// Effective ceiling for this tick
    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn remaining(&self) -> f64 {
        (self.limit - self.used()).max(0.0)
    }

    /// False once starting more work could cross the ceiling
    pub fn has_budget(&self, margin: f64) -> bool {
        self.used() + margin.max(0.0) < self.limit
    }

    pub fn mode(&self) -> BudgetMode {
        self.mode
    }

    pub fn is_critical(&self) -> bool {
        self.mode == BudgetMode::Critical
    }

    /// Whether work at `priority` may be dispatched in the current mode
    pub fn admits(&self, priority: Priority) -> bool {
        !self.is_critical() || priority.value() <= self.config.critical_priority.value()
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            used: self.used(),
            limit: self.limit,
            bucket: self.bucket,
            mode: self.mode,
        }
    }
}

impl fmt::Debug for BudgetGate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetGate")
            .field("limit", &self.limit)
            .field("bucket", &self.bucket)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::Tick;
    use std::cell::Cell;

    struct FixedHost {
        used: Cell<f64>,
        limit: f64,
        tick_limit: f64,
        bucket: f64,
    }

    impl FixedHost {
        fn new(limit: f64, bucket: f64) -> Self {
            Self {
                used: Cell::new(0.0),
                limit,
                tick_limit: 500.0,
                bucket,
            }
        }
    }

    impl HostApi for FixedHost {
        fn time(&self) -> Tick {
            Tick::new(1)
        }
        fn cpu_used(&self) -> f64 {
            self.used.get()
        }
        fn cpu_limit(&self) -> f64 {
            self.limit
        }
        fn tick_limit(&self) -> f64 {
            self.tick_limit
        }
        fn bucket(&self) -> f64 {
            self.bucket
        }
    }

    #[test]
    fn test_normal_mode_uses_nominal_limit() {
        let host = FixedHost::new(20.0, 10_000.0);
        let gate = BudgetGate::new(&host, BudgetConfig::default());
        assert_eq!(gate.mode(), BudgetMode::Normal);
        assert_eq!(gate.limit(), 20.0);
        assert_eq!(gate.remaining(), 20.0);
    }

    #[test]
    fn test_throttled_mode_scales_limit() {
        let host = FixedHost::new(20.0, 1000.0);
        let gate = BudgetGate::new(&host, BudgetConfig::default());
        assert_eq!(gate.mode(), BudgetMode::Throttled);
        assert_eq!(gate.limit(), 10.0);
    }

    #[test]
    fn test_critical_mode_floors_ratio_and_filters_priority() {
        let host = FixedHost::new(20.0, 100.0);
        let gate = BudgetGate::new(&host, BudgetConfig::default());
        assert_eq!(gate.mode(), BudgetMode::Critical);
        assert_eq!(gate.limit(), 4.0);
        assert!(gate.admits(Priority::HIGHEST));
        assert!(gate.admits(Priority::HIGH));
        assert!(!gate.admits(Priority::DEFAULT));
    }

    #[test]
    fn test_hard_limit_caps_nominal() {
        let mut host = FixedHost::new(20.0, 10_000.0);
        host.tick_limit = 15.0;
        let gate = BudgetGate::new(&host, BudgetConfig::default());
        assert_eq!(gate.limit(), 15.0);
    }

    #[test]
    fn test_has_budget_respects_margin() {
        let host = FixedHost::new(10.0, 10_000.0);
        let gate = BudgetGate::new(&host, BudgetConfig::default());
        host.used.set(8.5);
        assert!(gate.has_budget(1.0));
        assert!(!gate.has_budget(1.5));
        host.used.set(12.0);
        assert!(!gate.has_budget(0.0));
        assert_eq!(gate.remaining(), 0.0);
    }

    #[test]
    fn test_config_sanitized() {
        let config = BudgetConfig {
            throttle_bucket: 100.0,
            critical_bucket: 900.0,
            min_throttle_ratio: 4.0,
            critical_priority: Priority::HIGH,
        }
        .sanitized();
        assert_eq!(config.critical_bucket, 100.0);
        assert_eq!(config.min_throttle_ratio, 1.0);

        let config = BudgetConfig {
            throttle_bucket: f64::NAN,
            ..BudgetConfig::default()
        }
        .sanitized();
        assert_eq!(config.throttle_bucket, 2000.0);
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: BudgetConfig = serde_json::from_str(r#"{"critical_bucket": 250}"#).unwrap();
        assert_eq!(config.critical_bucket, 250.0);
        assert_eq!(config.throttle_bucket, 2000.0);
    }
}
