//! Data model for the mission engine.
//!
//! Mission definitions are authored externally and never mutated; mission
//! runs are the mutable records the engine drives through their lifecycle.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{CoreError, Result};
