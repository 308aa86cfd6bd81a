//! # tickd Host Daemon
//!
//! Drives the tick kernel the way an external host would: one bounded
//! invocation per tick, nothing kept in memory between them except what is in
//! the store.
//!
//! ## Philosophy
//!
//! - **Host owns I/O**: programs never print; the daemon prints tick reports
//!   and forwards the kernel log to stderr
//! - **The store is the only state**: the simulated clock and bucket are
//!   persisted next to the kernel table, so a restarted daemon continues
//!   where it stopped
//! - **Deterministic**: the simulated host only advances when told to
//!
//! ## Responsibilities
//!
//! The daemon:
//! - Opens a directory-backed store
//! - Registers the demo programs and keeps `init` alive
//! - Boots, runs and checkpoints one kernel per tick
//!
//! ## Non-Responsibilities
//!
//! The daemon does NOT:
//! - Run programs in parallel
//! - Interrupt a routine that overshoots the budget
//! - Give programs access to the host clock beyond their contexts

pub mod console_log;
pub mod programs;
pub mod runtime;

pub use programs::{registry, EMPIRE, INIT, RECON, SCOUT};
pub use runtime::{Tickd, TickdConfig, TickdError, HOST_KEY};
