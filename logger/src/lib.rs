//! # Logger
//!
//! Structured logging for the kernel and the processes it runs.
//!
//! ## Philosophy
//!
//! Logging is explicit and structured, not text-based or printf-style.
//! Every entry knows the tick it was written on and, when written on behalf
//! of a process, the pid and the thread that was executing. Where the
//! entries end up is decided by the embedding host through [`LogSink`].

use core_types::{Pid, Tid};
use kernel_api::Tick;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Something finished the way it was meant to
    Success,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// A structured log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Tick the entry was written on
    pub tick: Tick,
    /// Process the entry was written for
    pub pid: Option<Pid>,
    /// Thread executing when the entry was written
    pub tid: Option<Tid>,
    /// Short origin label, e.g. the process friendly name or `Kernel`
    pub tag: String,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Creates a new log entry
    pub fn new(level: LogLevel, tick: Tick, message: impl Into<String>) -> Self {
        Self {
            level,
            tick,
            pid: None,
            tid: None,
            tag: String::new(),
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_tid(mut self, tid: Option<Tid>) -> Self {
        self.tid = tid;
        self
    }

    /// Adds a field to the log entry
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ", self.tick, self.level)?;
        if !self.tag.is_empty() {
            write!(f, "<{}> ", self.tag)?;
        }
        if let Some(pid) = &self.pid {
            let tid = self.tid.as_ref().map(Tid::as_str).unwrap_or("-");
            write!(f, "{}/{} ", pid, tid)?;
        }
        f.write_str(&self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Destination for log entries
pub trait LogSink {
    fn record(&mut self, entry: LogEntry);
}

/// Keeps entries in memory
///
/// Used by tests and by hosts that want to inspect a tick's log after the
/// kernel returns.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    min_level: LogLevel,
    entries: Vec<LogEntry>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::with_min_level(LogLevel::Debug)
    }

    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self {
            min_level,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn at_level(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.level == level)
    }

    /// Entries written for `pid`
    pub fn for_pid<'a>(&'a self, pid: &'a Pid) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.entries.iter().filter(move |e| e.pid.as_ref() == Some(pid))
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemoryLog {
    fn record(&mut self, entry: LogEntry) {
        if entry.level >= self.min_level {
            self.entries.push(entry);
        }
    }
}

/// Forwards entries to the `log` facade
#[derive(Debug, Clone)]
pub struct FacadeLog {
    min_level: LogLevel,
}

impl FacadeLog {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Default for FacadeLog {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl LogSink for FacadeLog {
    fn record(&mut self, entry: LogEntry) {
        if entry.level < self.min_level {
            return;
        }
        let target = if entry.tag.is_empty() {
            "tickos"
        } else {
            entry.tag.as_str()
        };
        match entry.level {
            LogLevel::Debug => log::debug!(target: target, "{}", entry),
            LogLevel::Info | LogLevel::Success => log::info!(target: target, "{}", entry),
            LogLevel::Warn => log::warn!(target: target, "{}", entry),
            LogLevel::Error => log::error!(target: target, "{}", entry),
        }
    }
}
