//! Processes: behavior plus the record the kernel keeps about them

use crate::context::{ProcessContext, ThreadContext};
use crate::thread::{Routine, Step, Thread, ThreadError, ThreadExit, MAIN_ROUTINE};
use core_types::{Pid, Priority};
use kernel_api::{KernelError, Tick};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error from a process lifecycle hook or constructor
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("Invalid process options: {0}")]
    Options(#[from] serde_json::Error),
}

impl ProcessError {
    pub fn failed(message: impl Into<String>) -> Self {
        ProcessError::Failed(message.into())
    }
}

/// Behavior of a named program
///
/// The kernel reconstructs the behavior every tick from the options returned
/// by [`Process::serialize`], so any state that must survive a tick lives in
/// those options, in a thread's [`Routine`], or in the process memory
/// namespace. Hooks receive a context bound to this process; everything they
/// can touch is scoped by it.
pub trait Process {
    /// Priority for a newly started process; the configured default when `None`
    fn priority(&self) -> Option<Priority> {
        None
    }

    /// Priority given to threads started without an explicit one
    fn default_thread_priority(&self) -> Option<Priority> {
        None
    }

    /// Runs once, when the process is first started
    fn on_start(&mut self, _ctx: &mut ProcessContext<'_, '_>) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Runs whenever the process is awake and has no threads
    fn on_reload(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<(), ProcessError> {
        ctx.start_thread(Routine::new(MAIN_ROUTINE), None, "Main thread")?;
        Ok(())
    }

    /// Advances the current thread by one step
    fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError>;

    /// Whether a persisted thread should be rebuilt after a restart
    fn restore_thread(&self, _routine: &Routine) -> bool {
        true
    }

    fn on_thread_exit(&mut self, _ctx: &mut ProcessContext<'_, '_>, _thread: &Thread, _exit: &ThreadExit) {}

    fn on_child_exit(&mut self, _ctx: &mut ProcessContext<'_, '_>, _child: &ProcessInfo) {}

    /// Runs once, just before the process is removed
    fn on_exit(&mut self, _ctx: &mut ProcessContext<'_, '_>) {}

    /// A sunset process is removed at the end of the tick
    fn is_sunset(&self, _ctx: &ProcessContext<'_, '_>) -> bool {
        false
    }

    /// Options to rebuild this behavior from; `Null` keeps the start options
    fn serialize(&self) -> Result<Value, ProcessError> {
        Ok(Value::Null)
    }
}

/// Kernel record of a process, persisted at checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<Pid>,
    /// Program name the behavior is registered under
    pub name: String,
    pub priority: Priority,
    pub default_thread_prio: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<Tick>,
    #[serde(default)]
    pub options: Value,
}

impl ProcessInfo {
    /// Display form of `name`, used to tag log lines
    pub fn friendly_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Tick the process was started on
    pub fn born(&self) -> Option<u64> {
        self.pid.born()
    }

    pub fn is_asleep(&self, now: Tick) -> bool {
        self.sleep.map_or(false, |until| now < until)
    }
}

/// CPU totals over a process's current threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub total_cpu: f64,
    pub avg_sys_cpu: f64,
    pub avg_usr_cpu: f64,
    pub min_cpu: f64,
    pub max_cpu: f64,
    pub threads: usize,
}

impl ProcessStats {
    pub fn from_threads<'t>(threads: impl IntoIterator<Item = &'t Thread>) -> Self {
        let mut stats = ProcessStats::default();
        for thread in threads {
            let cpu = thread.stats();
            stats.total_cpu += cpu.last_run;
            stats.avg_sys_cpu += cpu.avg_sys;
            stats.avg_usr_cpu += cpu.avg_usr;
            stats.min_cpu += cpu.min;
            stats.max_cpu += cpu.max;
            stats.threads += 1;
        }
        stats.total_cpu = round3(stats.total_cpu);
        stats.avg_sys_cpu = round3(stats.avg_sys_cpu);
        stats.avg_usr_cpu = round3(stats.avg_usr_cpu);
        stats.min_cpu = round3(stats.min_cpu);
        stats.max_cpu = round3(stats.max_cpu);
        stats
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
