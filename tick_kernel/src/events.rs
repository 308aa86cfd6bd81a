//! Per-tick audit trail
//!
//! Every decision the kernel makes during a tick is appended to the report as
//! a [`ScheduleEvent`], in the order it happened. Tests read the trail to
//! check dispatch order; the host daemon prints a summary of it.

use core_types::{Pid, Tid};
use kernel_api::Tick;
use lifecycle::{FutureKey, ReleaseKind};
use resources::BudgetSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a process left the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessExitReason {
    /// Awake with no threads left
    Finished,
    /// Killed by its parent, itself or the host
    Killed,
    /// Reported itself as sunset
    Sunset,
    /// Its parent exited under the kill orphan policy
    Orphaned,
}

/// Why a thread left the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadExitReason {
    Completed,
    Failed,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    ProcessStarted { pid: Pid, name: String },
    /// `on_reload` ran because the process had no threads
    ProcessReloaded { pid: Pid },
    /// A persisted record could not be rebuilt and is carried unchanged
    ProcessQuarantined { pid: Option<Pid>, reason: String },
    ProcessExited { pid: Pid, reason: ProcessExitReason },
    ThreadStarted { tid: Tid, pid: Pid },
    ThreadResumed { tid: Tid, pid: Pid },
    ThreadExited { tid: Tid, pid: Pid, reason: ThreadExitReason },
    /// Dispatch stopped with threads still ready
    BudgetExhausted { used: f64, limit: f64, deferred: usize },
    /// Ready thread skipped because its process is below the critical cutoff
    CriticalSkipped { tid: Tid },
    FutureReleased { key: FutureKey, kind: ReleaseKind, waiters: usize },
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: Tick,
    pub events: Vec<ScheduleEvent>,
    pub budget: BudgetSnapshot,
    pub processes: usize,
    pub threads: usize,
}

impl TickReport {
    /// Threads in the order they were resumed
    pub fn dispatch_order(&self) -> Vec<Tid> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ScheduleEvent::ThreadResumed { tid, .. } => Some(tid.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn failed_threads(&self) -> Vec<Tid> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ScheduleEvent::ThreadExited {
                    tid,
                    reason: ThreadExitReason::Failed,
                    ..
                } => Some(tid.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn exited_processes(&self) -> Vec<(Pid, ProcessExitReason)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ScheduleEvent::ProcessExited { pid, reason } => Some((pid.clone(), *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn budget_exhausted(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, ScheduleEvent::BudgetExhausted { .. }))
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick {}: {} processes, {} threads, {} resumed, cpu {:.2}/{:.2} ({})",
            self.tick,
            self.processes,
            self.threads,
            self.dispatch_order().len(),
            self.budget.used,
            self.budget.limit,
            self.budget.mode
        )
    }
}
