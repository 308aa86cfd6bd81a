//! Unique identifiers for processes and threads
//!
//! Identifiers have the shape `<tick>.<seq>` where both parts are upper-case
//! base36. The tick is the host tick on which the id was allocated and the
//! sequence counter restarts at zero on every tick. Because the kernel is
//! rebuilt from scratch each tick, the pair is unique without any persisted
//! counter.

use serde::{Deserialize, Serialize};
use std::fmt;

const THREAD_PREFIX: &str = "T";

/// Unique identifier for a process
///
/// A pid is allocated once by the kernel and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(String);

impl Pid {
    /// Wraps an existing identifier string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the tick this pid was allocated on
    pub fn born(&self) -> Option<u64> {
        decode_tick(&self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a thread
///
/// Thread ids share the pid sequence but carry a `T` prefix so the two can
/// never be confused in logs or persisted tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tid(String);

impl Tid {
    /// Wraps an existing identifier string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the tick this tid was allocated on
    pub fn born(&self) -> Option<u64> {
        decode_tick(self.0.strip_prefix(THREAD_PREFIX).unwrap_or(&self.0))
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocates pids and tids for a single tick
#[derive(Debug, Clone)]
pub struct IdGenerator {
    tick: u64,
    seq: u64,
}

impl IdGenerator {
    /// Creates a generator for the given tick with the sequence at zero
    pub fn new(tick: u64) -> Self {
        Self { tick, seq: 0 }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Number of identifiers handed out so far this tick
    pub fn issued(&self) -> u64 {
        self.seq
    }

    pub fn next_pid(&mut self) -> Pid {
        Pid(self.next_id(""))
    }

    pub fn next_tid(&mut self) -> Tid {
        Tid(self.next_id(THREAD_PREFIX))
    }

    fn next_id(&mut self, prefix: &str) -> String {
        let seq = self.seq;
        self.seq += 1;
        format!("{}{}.{}", prefix, to_base36(self.tick), to_base36(seq))
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn decode_tick(id: &str) -> Option<u64> {
    let (tick, _) = id.split_once('.')?;
    u64::from_str_radix(tick, 36).ok()
}
