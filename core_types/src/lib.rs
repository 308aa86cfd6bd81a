//! # Core Types
//!
//! Fundamental identifiers and scheduling values shared by every tickos crate.
//!
//! ## Key Types
//!
//! - [`Pid`]: Process identifier, unique for the lifetime of the system
//! - [`Tid`]: Thread identifier, unique across all processes
//! - [`IdGenerator`]: Per-tick allocator for both kinds of identifier
//! - [`Priority`]: Scheduling priority, 0.0 (highest) to 1.0 (lowest)

pub mod ids;
pub mod priority;

pub use ids::{IdGenerator, Pid, Tid};
pub use priority::Priority;
