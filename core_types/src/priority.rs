//! Scheduling priority
//!
//! Lower values run first. Values outside `0.0..=1.0` are clamped and NaN
//! falls back to [`Priority::DEFAULT`], so a priority read back from
//! persisted state is always usable for ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Priority(f64);

impl Priority {
    pub const HIGHEST: Priority = Priority(0.0);
    pub const CRITICAL: Priority = Priority(0.0);
    pub const HIGH: Priority = Priority(0.25);
    pub const DEFAULT: Priority = Priority(0.5);
    pub const LOW: Priority = Priority(0.75);
    pub const IDLE: Priority = Priority(1.0);
    pub const LOWEST: Priority = Priority(1.0);

    /// Creates a priority, clamping into `0.0..=1.0`
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::DEFAULT;
        }
        // `+ 0.0` turns -0.0 into 0.0 so it orders equal to zero
        Self(value.clamp(0.0, 1.0) + 0.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Total order used by the dispatch loop
    pub fn order(&self, other: &Priority) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<f64> for Priority {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Priority> for f64 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_clamps() {
        assert_eq!(Priority::new(-3.0), Priority::HIGHEST);
        assert_eq!(Priority::new(7.0), Priority::LOWEST);
        assert_eq!(Priority::new(f64::NAN), Priority::DEFAULT);
        assert_eq!(Priority::new(0.3).value(), 0.3);
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(Priority::HIGH.order(&Priority::LOW), Ordering::Less);
        assert_eq!(Priority::IDLE.order(&Priority::DEFAULT), Ordering::Greater);
        assert_eq!(Priority::DEFAULT.order(&Priority::new(0.5)), Ordering::Equal);
    }

    #[test]
    fn test_negative_zero_orders_as_zero() {
        let negative = Priority::new(-0.0);
        assert!(negative.value().is_sign_positive());
        assert_eq!(negative.order(&Priority::new(0.0)), Ordering::Equal);
        assert_eq!(negative.order(&Priority::HIGHEST), Ordering::Equal);

        let p: Priority = serde_json::from_str("-0.0").unwrap();
        assert_eq!(p.order(&Priority::HIGHEST), Ordering::Equal);
        assert_eq!(serde_json::to_string(&p).unwrap(), "0.0");
    }

    #[test]
    fn test_priority_deserialize_clamps() {
        let p: Priority = serde_json::from_str("4.5").unwrap();
        assert_eq!(p, Priority::LOWEST);
        assert_eq!(serde_json::to_string(&Priority::HIGH).unwrap(), "0.25");
    }
}
