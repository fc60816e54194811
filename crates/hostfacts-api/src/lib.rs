//! Boundary types for hostfacts
//!
//! This crate defines the capabilities the resolution core consumes from
//! its surroundings: a fact lookup for confines and a diagnostic sink for
//! warnings. It also defines the value type resolutions produce.

mod mock;
mod sink;
mod traits;
mod value;

pub use mock::*;
pub use sink::*;
pub use traits::*;
pub use value::*;
