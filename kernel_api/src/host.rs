//! Host interface

use crate::Tick;

/// Read-only view of the host that drives the kernel
///
/// CPU values are in milliseconds. `cpu_used` must be monotonic within a
/// tick; the kernel samples it around every thread resumption.
pub trait HostApi {
    /// Current tick number
    fn time(&self) -> Tick;

    /// CPU consumed so far during this tick
    fn cpu_used(&self) -> f64;

    /// Nominal CPU allowance per tick
    fn cpu_limit(&self) -> f64;

    /// Hard ceiling for this tick, after which the host aborts the invocation
    fn tick_limit(&self) -> f64;

    /// Banked CPU reserve
    fn bucket(&self) -> f64;
}
