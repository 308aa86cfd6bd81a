//! # Simulated Host
//!
//! Deterministic host for tests and the local daemon.
//!
//! Time only moves when [`SimHost::next_tick`] is called and CPU is only
//! consumed when something calls [`SimHost::burn`]. Clones share state, so a
//! process behavior can hold a clone and burn CPU from inside a routine.

use kernel_api::{HostApi, Tick};
use std::cell::Cell;
use std::rc::Rc;

/// Largest reserve the simulated bucket can hold
pub const BUCKET_MAX: f64 = 10_000.0;

#[derive(Debug)]
struct HostState {
    tick: Cell<u64>,
    used: Cell<f64>,
    limit: Cell<f64>,
    tick_limit: Cell<f64>,
    bucket: Cell<f64>,
}

#[derive(Debug, Clone)]
pub struct SimHost {
    state: Rc<HostState>,
}

impl SimHost {
    /// A host at tick 0 with a full bucket and `limit` CPU per tick
    pub fn new(limit: f64) -> Self {
        Self {
            state: Rc::new(HostState {
                tick: Cell::new(0),
                used: Cell::new(0.0),
                limit: Cell::new(limit),
                tick_limit: Cell::new(limit.max(500.0)),
                bucket: Cell::new(BUCKET_MAX),
            }),
        }
    }

    pub fn with_tick(self, tick: u64) -> Self {
        self.state.tick.set(tick);
        self
    }

    pub fn with_bucket(self, bucket: f64) -> Self {
        self.set_bucket(bucket);
        self
    }

    pub fn with_tick_limit(self, tick_limit: f64) -> Self {
        self.state.tick_limit.set(tick_limit);
        self
    }

    /// Consumes `amount` CPU in the current tick
    pub fn burn(&self, amount: f64) {
        self.state.used.set(self.state.used.get() + amount.max(0.0));
    }

    pub fn set_bucket(&self, bucket: f64) {
        self.state.bucket.set(bucket.clamp(0.0, BUCKET_MAX));
    }

    pub fn set_limit(&self, limit: f64) {
        self.state.limit.set(limit);
    }

    /// Ends the current tick: unused CPU refills the bucket, usage resets
    pub fn next_tick(&self) {
        let state = &self.state;
        let refill = state.limit.get() - state.used.get();
        self.set_bucket(state.bucket.get() + refill);
        state.used.set(0.0);
        state.tick.set(state.tick.get() + 1);
    }

    pub fn advance(&self, ticks: u64) {
        for _ in 0..ticks {
            self.next_tick();
        }
    }
}

impl HostApi for SimHost {
    fn time(&self) -> Tick {
        Tick::new(self.state.tick.get())
    }

    fn cpu_used(&self) -> f64 {
        self.state.used.get()
    }

    fn cpu_limit(&self) -> f64 {
        self.state.limit.get()
    }

    fn tick_limit(&self) -> f64 {
        self.state.tick_limit.get()
    }

    fn bucket(&self) -> f64 {
        self.state.bucket.get()
    }
}
