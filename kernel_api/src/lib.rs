//! # Kernel API
//!
//! The boundary between the tick kernel and the host that invokes it.
//!
//! ## Philosophy
//!
//! The host owns time and CPU accounting; the kernel only reads them:
//! - The current tick number (monotonic across invocations)
//! - CPU used so far this tick (monotonic within the tick)
//! - The nominal CPU limit, the hard per-tick limit, and the banked reserve
//!
//! Everything the kernel needs from its environment goes through
//! [`HostApi`], which keeps the scheduler testable against a simulated host.

pub mod error;
pub mod host;
pub mod time;

pub use error::KernelError;
pub use host::HostApi;
pub use time::Tick;
