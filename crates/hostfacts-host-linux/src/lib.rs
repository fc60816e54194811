//! Unix host plumbing for hostfacts
//!
//! Provides:
//! - Command expansion against `PATH` and the system binary directories
//! - Process spawning in a dedicated process group with stdout capture
//! - Deadline-bounded waits with process group kill on timeout
//! - Non-blocking reaping of orphaned child processes

mod command;
mod error;
mod process;
mod reap;

pub use command::*;
pub use error::*;
pub use process::*;
pub use reap::*;
