//! Kernel error types

use core_types::{Pid, Tid};
use thiserror::Error;

/// Errors surfaced by kernel operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KernelError {
    /// A process tried to reach a thread or process it does not own
    #[error("Process {pid} does not have permission to access {target}")]
    PermissionDenied { pid: Pid, target: String },

    #[error("Process not found: {0}")]
    ProcessNotFound(Pid),

    #[error("Thread not found: {0}")]
    ThreadNotFound(Tid),

    /// No behavior is registered under the requested process name
    #[error("Unknown program: {0}")]
    UnknownProgram(String),

    #[error("Failed to start process {name}: {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Store(String),

    /// The operation needs an executing thread and none is current
    #[error("No thread is currently executing")]
    NoCurrentThread,
}

impl KernelError {
    /// True for capability violations
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, KernelError::PermissionDenied { .. })
    }
}
