//! Fact resolution engine for hostfacts
//!
//! A [`Resolution`] is one candidate way of computing a fact. It decides
//! whether it applies to the running host through its [`Confine`]s,
//! computes its value through the [`ExecutionEngine`] and caches it until
//! flushed.

mod confine;
mod error;
mod execution;
mod ranking;
mod resolution;

pub use confine::*;
pub use error::*;
pub use execution::*;
pub use ranking::*;
pub use resolution::*;
