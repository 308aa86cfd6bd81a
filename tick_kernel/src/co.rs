//! Helpers for writing routines
//!
//! Each helper either reports that the caller may proceed or arranges for
//! the thread to be resumed later, in which case the routine should return
//! [`Step::Yield`](crate::Step::Yield).

use crate::context::ThreadContext;
use kernel_api::Tick;
use serde::{Deserialize, Serialize};

/// True once `tick` has arrived; otherwise the thread sleeps until it does
pub fn wait_for_tick(ctx: &mut ThreadContext<'_, '_>, tick: Tick) -> bool {
    if ctx.now() >= tick {
        return true;
    }
    ctx.sleep_until(tick);
    false
}

/// True while `used + margin` is still below this tick's throttled ceiling
///
/// This is the same headroom rule dispatch applies before each resumption,
/// so a routine that checks it between units of work stops exactly where
/// the kernel would. On `false` the routine should return `Step::Yield` and
/// pick up again next tick.
pub fn wait_for_cpu(ctx: &ThreadContext<'_, '_>, margin: f64) -> bool {
    ctx.has_budget(margin)
}

/// A recurring deadline kept in routine state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<Tick>,
}

impl Interval {
    pub fn new() -> Self {
        Self::default()
    }

    /// An interval that has never fired is due immediately
    pub fn is_due(&self, now: Tick) -> bool {
        self.next.map_or(true, |next| now >= next)
    }

    pub fn next(&self) -> Option<Tick> {
        self.next
    }

    /// Marks the interval as fired and sets the next deadline
    pub fn reset(&mut self, now: Tick, period: u64) {
        self.next = Some(now + period);
    }

    /// Sleeps the thread until the next deadline; true if it is already due
    pub fn wait(&self, ctx: &mut ThreadContext<'_, '_>) -> bool {
        match self.next {
            Some(next) => wait_for_tick(ctx, next),
            None => true,
        }
    }
}
