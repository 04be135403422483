pub mod capabilities;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod resources;
pub mod state_machine;
pub mod store;

pub use capability::{
    from_fn, Capability, CapabilityContext, CapabilityError, CapabilityRegistry, CapabilityResult,
};
pub use config::EngineConfig;
pub use engine::{Approval, MissionEngine, RunOptions};
pub use error::{OrchestratorError, Result};
pub use state_machine::{MissionStateMachine, PhaseStateMachine, StepStateMachine};
pub use store::MissionStore;
