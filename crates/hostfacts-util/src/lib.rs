//! Shared utilities for hostfacts
//!
//! This crate provides:
//! - Error types
//! - Scoped process environment overrides
//! - Text normalization for fact values

mod environment;
mod error;
mod normalize;

pub use environment::*;
pub use error::*;
pub use normalize::*;
