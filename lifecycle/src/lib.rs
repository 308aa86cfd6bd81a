//! # Lifecycle
//!
//! Cross-tick futures and deadlines.
//!
//! ## Philosophy
//!
//! - **Data, not closures**: a future is a persisted record keyed by name, so
//!   it survives the kernel being rebuilt every tick
//! - **Resolution is batched**: `put` and `throw` only record the outcome;
//!   waiters are released together when the kernel drains at the end of the
//!   tick
//! - **Nothing dangles**: every future either resolves or times out, and a
//!   timeout is delivered to every waiter
//!
//! ## Core Concepts
//!
//! - `FutureKey`: logical name several consumers can wait on
//! - `FutureTable`: pending futures plus a per-thread inbox of resolutions
//! - `Deadline`: the tick after which an unresolved future is purged
//! - `Release`: what a drain did to one future, so the kernel can wake waiters

use core_types::Tid;
use kernel_api::Tick;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Logical name of a future
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FutureKey(String);

impl FutureKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FutureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FutureKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for FutureKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&FutureKey> for FutureKey {
    fn from(key: &FutureKey) -> Self {
        key.clone()
    }
}

/// Failure delivered to the waiters of a future
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum FutureError {
    /// Nobody resolved the future before its deadline
    #[error("Time limit exceeded waiting for {key}")]
    TimeLimitExceeded { key: FutureKey },

    /// The producer failed the future
    #[error("{0}")]
    Failed(String),
}

/// Outcome a waiter receives
pub type Resolution = Result<Value, FutureError>;

/// A point in time after which an operation has timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deadline {
    tick: Tick,
}

impl Deadline {
    pub fn at(tick: Tick) -> Self {
        Self { tick }
    }

    /// Deadline `ticks` after `now`
    pub fn after(now: Tick, ticks: u64) -> Self {
        Self { tick: now + ticks }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// The deadline tick itself is still in time
    pub fn has_passed(&self, now: Tick) -> bool {
        now > self.tick
    }

    pub fn ticks_remaining(&self, now: Tick) -> u64 {
        self.tick.since(now)
    }
}

/// State of a wait registration
#[derive(Debug, Clone, PartialEq)]
pub enum WaitState {
    /// Resolution is available now
    Ready(Resolution),
    /// Registered; the resolution arrives after a later drain
    Pending,
}

/// What happened to a future during a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseKind {
    Fulfilled,
    Failed,
    TimedOut,
}

/// A future removed from the pending set, with the waiters it released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub key: FutureKey,
    pub kind: ReleaseKind,
    pub waiters: Vec<Tid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingFuture {
    deadline: Deadline,
    waiters: Vec<Tid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolution: Option<Resolution>,
}

/// Persisted table of futures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FutureTable {
    pending: BTreeMap<FutureKey, PendingFuture>,
    inbox: BTreeMap<Tid, BTreeMap<FutureKey, Resolution>>,
}

impl FutureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits on `key` as `waiter`
    ///
    /// A resolution already delivered to this waiter, or one recorded earlier
    /// this tick, is returned immediately. Otherwise the waiter is registered
    /// (once) and the first registration fixes the deadline.
    pub fn wait(&mut self, key: &FutureKey, waiter: &Tid, now: Tick, timeout: u64) -> WaitState {
        if let Some(resolution) = self.take(waiter, key) {
            return WaitState::Ready(resolution);
        }

        let entry = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| PendingFuture {
                deadline: Deadline::after(now, timeout),
                waiters: Vec::new(),
                resolution: None,
            });

        if let Some(resolution) = &entry.resolution {
            return WaitState::Ready(resolution.clone());
        }

        if !entry.waiters.contains(waiter) {
            entry.waiters.push(waiter.clone());
        }
        WaitState::Pending
    }

    /// Fulfils `key`; returns false if it was already resolved this tick
    pub fn put(&mut self, key: &FutureKey, value: Value, now: Tick) -> bool {
        self.resolve(key, Ok(value), now)
    }

    /// Fails `key`; returns false if it was already resolved this tick
    pub fn throw(&mut self, key: &FutureKey, error: impl Into<String>, now: Tick) -> bool {
        self.resolve(key, Err(FutureError::Failed(error.into())), now)
    }

    fn resolve(&mut self, key: &FutureKey, resolution: Resolution, now: Tick) -> bool {
        let entry = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| PendingFuture {
                deadline: Deadline::at(now),
                waiters: Vec::new(),
                resolution: None,
            });
        if entry.resolution.is_some() {
            return false;
        }
        entry.resolution = Some(resolution);
        true
    }

    /// Releases resolved futures and purges expired ones
    ///
    /// Resolutions are moved into each waiter's inbox. Resolved futures
    /// without waiters are dropped.
    pub fn drain(&mut self, now: Tick) -> Vec<Release> {
        let keys: Vec<FutureKey> = self
            .pending
            .iter()
            .filter(|(_, f)| f.resolution.is_some() || f.deadline.has_passed(now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut released = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(future) = self.pending.remove(&key) else {
                continue;
            };
            let (resolution, kind) = match future.resolution {
                Some(Ok(value)) => (Ok(value), ReleaseKind::Fulfilled),
                Some(Err(err)) => (Err(err), ReleaseKind::Failed),
                None => (
                    Err(FutureError::TimeLimitExceeded { key: key.clone() }),
                    ReleaseKind::TimedOut,
                ),
            };
            for waiter in &future.waiters {
                self.inbox
                    .entry(waiter.clone())
                    .or_default()
                    .insert(key.clone(), resolution.clone());
            }
            released.push(Release {
                key,
                kind,
                waiters: future.waiters,
            });
        }
        released
    }

    /// Removes a delivered resolution from `waiter`'s inbox
    pub fn take(&mut self, waiter: &Tid, key: &FutureKey) -> Option<Resolution> {
        let inbox = self.inbox.get_mut(waiter)?;
        let resolution = inbox.remove(key);
        if inbox.is_empty() {
            self.inbox.remove(waiter);
        }
        resolution
    }

    /// Drops every registration and delivery belonging to `waiter`
    pub fn forget(&mut self, waiter: &Tid) {
        self.inbox.remove(waiter);
        for future in self.pending.values_mut() {
            future.waiters.retain(|w| w != waiter);
        }
    }

    /// Keeps only waiters for which `alive` holds
    pub fn retain_waiters(&mut self, mut alive: impl FnMut(&Tid) -> bool) {
        self.inbox.retain(|tid, _| alive(tid));
        for future in self.pending.values_mut() {
            future.waiters.retain(|w| alive(w));
        }
    }

    pub fn is_pending(&self, key: &FutureKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn waiters(&self, key: &FutureKey) -> &[Tid] {
        self.pending
            .get(key)
            .map(|f| f.waiters.as_slice())
            .unwrap_or(&[])
    }

    pub fn deadline(&self, key: &FutureKey) -> Option<Deadline> {
        self.pending.get(key).map(|f| f.deadline)
    }

    pub fn has_delivery(&self, waiter: &Tid) -> bool {
        self.inbox.contains_key(waiter)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.inbox.is_empty()
    }
}
