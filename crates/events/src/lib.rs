//! Event system for the mission engine
//!
//! This crate provides the mission event bus and the event types observers
//! (notification sinks, UI panels) consume.

mod bus;
mod types;

pub use bus::{MissionEventBus, Subscription};
pub use types::*;
