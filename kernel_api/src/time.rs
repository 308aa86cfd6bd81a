//! Tick arithmetic

use core::ops::Add;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A host tick number
///
/// Ticks are the only unit of time the kernel knows about. Sleeping,
/// future deadlines and id allocation are all expressed in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(u64);

impl Tick {
    /// A tick that never arrives; used to park threads indefinitely
    pub const NEVER: Tick = Tick(u64::MAX);

    pub const fn new(tick: u64) -> Self {
        Self(tick)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the tick `ticks` after this one, saturating at [`Tick::NEVER`]
    pub fn after(&self, ticks: u64) -> Tick {
        Tick(self.0.saturating_add(ticks))
    }

    /// Number of ticks elapsed since `earlier`, zero if `earlier` is later
    pub fn since(&self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn is_never(&self) -> bool {
        *self == Tick::NEVER
    }
}

impl Add<u64> for Tick {
    type Output = Tick;

    fn add(self, ticks: u64) -> Self::Output {
        self.after(ticks)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "never")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
