//! Threads and the routines they run
//!
//! A thread is a resumable unit of work owned by exactly one process. The
//! kernel is rebuilt every tick, so a thread cannot hold a live coroutine
//! across ticks; instead it carries a [`Routine`]: a named entry point plus a
//! JSON state the owning process reads and updates on every resumption. The
//! routine is persisted with the thread, which is what makes resumption after
//! a rebuild possible at all.

use core_types::{Pid, Priority, Tid};
use kernel_api::{KernelError, Tick};
use lifecycle::FutureError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::error::Error as StdError;
use thiserror::Error;

/// Name of the routine started by the default `on_reload`
pub const MAIN_ROUTINE: &str = "main";

/// Persisted coroutine of a thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    name: String,
    #[serde(default)]
    state: Value,
}

impl Routine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Value::Null,
        }
    }

    /// Routine starting from a typed state
    pub fn with_state<T: Serialize>(name: impl Into<String>, state: &T) -> Result<Self, ThreadError> {
        Ok(Self {
            name: name.into(),
            state: serde_json::to_value(state)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut Value {
        &mut self.state
    }

    /// Reads the state as `T`; a routine that never stored state yields `T::default()`
    pub fn load<T: DeserializeOwned + Default>(&self) -> Result<T, ThreadError> {
        if self.state.is_null() {
            return Ok(T::default());
        }
        Ok(serde_json::from_value(self.state.clone())?)
    }

    pub fn store<T: Serialize>(&mut self, state: &T) -> Result<(), ThreadError> {
        self.state = serde_json::to_value(state)?;
        Ok(())
    }

    /// Switches to another entry point with a fresh state
    pub fn goto(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.state = Value::Null;
    }
}

/// What a resumption asks the kernel to do next
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Suspend; resume again on a later tick
    Yield,
    /// The thread is finished, optionally with a result
    Done(Option<Value>),
}

impl Step {
    pub fn done() -> Self {
        Step::Done(None)
    }

    pub fn done_with<T: Serialize>(value: &T) -> Result<Self, ThreadError> {
        Ok(Step::Done(Some(serde_json::to_value(value)?)))
    }
}

/// Error returned from a resumption; the thread terminates with it
#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Future(#[from] FutureError),

    #[error("Routine state error: {0}")]
    State(#[from] serde_json::Error),

    #[error("Unknown routine: {0}")]
    UnknownRoutine(String),
}

impl ThreadError {
    pub fn failed(message: impl Into<String>) -> Self {
        ThreadError::Failed(message.into())
    }
}

/// Why a thread failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadFailure {
    pub message: String,
    /// The routine panicked rather than returning an error
    pub panicked: bool,
    /// Error source chain, outermost first
    pub chain: Vec<String>,
}

impl ThreadFailure {
    pub(crate) fn from_error(err: &ThreadError) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            panicked: false,
            chain,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "thread panicked".to_string()
        };
        Self {
            message,
            panicked: true,
            chain: Vec::new(),
        }
    }
}

/// How a thread left the table
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadExit {
    Completed(Option<Value>),
    Failed(ThreadFailure),
    /// Killed by its process, or taken down with it
    Killed,
}

impl ThreadExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, ThreadExit::Failed(_))
    }
}

/// Per-thread CPU accounting, in host CPU units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    /// Cost of the most recent dispatch, kernel overhead included
    pub last_run: f64,
    /// Moving average including kernel overhead
    pub avg_sys: f64,
    /// Moving average of the routine alone
    pub avg_usr: f64,
    pub min: f64,
    pub max: f64,
    pub runs: u64,
}

impl CpuStats {
    /// Folds one dispatch into the averages over a `window`-sample horizon
    pub fn record(&mut self, usr: f64, sys: f64, window: u32) {
        let usr = usr.max(0.0);
        let sys = sys.max(usr);
        if self.runs == 0 {
            self.avg_usr = usr;
            self.avg_sys = sys;
            self.min = usr;
            self.max = usr;
        } else {
            let n = f64::from(window.max(1));
            self.avg_usr = self.avg_usr * (1.0 - 1.0 / n) + usr / n;
            self.avg_sys = self.avg_sys * (1.0 - 1.0 / n) + sys / n;
            self.min = self.min.min(usr);
            self.max = self.max.max(usr);
        }
        self.last_run = sys;
        self.runs += 1;
    }
}

/// A thread record, as held in the kernel table and persisted at checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub(crate) tid: Tid,
    pub(crate) pid: Pid,
    pub(crate) priority: Priority,
    #[serde(default)]
    pub(crate) description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) sleep: Option<Tick>,
    #[serde(default)]
    pub(crate) stats: CpuStats,
    pub(crate) routine: Routine,
}

impl Thread {
    pub fn tid(&self) -> &Tid {
        &self.tid
    }

    /// Owning process
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Tick from which the thread is runnable again
    pub fn sleep(&self) -> Option<Tick> {
        self.sleep
    }

    pub fn stats(&self) -> &CpuStats {
        &self.stats
    }

    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    pub fn is_asleep(&self, now: Tick) -> bool {
        self.sleep.map_or(false, |until| now < until)
    }

    /// Parked threads only wake when something clears their sleep
    pub fn is_parked(&self) -> bool {
        self.sleep.map_or(false, |until| until.is_never())
    }
}

/// A thread that has not been attached yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewThread {
    pub(crate) routine: Routine,
    pub(crate) description: String,
}

impl NewThread {
    pub fn new(routine: Routine) -> Self {
        Self {
            routine,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
