//! RAII resource guards for automatic cleanup.
//!
//! - [`MissionGuard`] - Exclusive executor slot per mission

mod mission_guard;

pub use mission_guard::{ActiveMissions, MissionGuard};
