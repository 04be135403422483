//! Built-in capabilities.
//!
//! - [`AnalyzeErrors`] - `guardian.analyze-errors`
//! - [`DraftPlan`] - `kai.draft-plan`
//! - [`ApprovalGate`] - `human.approve`

pub mod approval;
pub mod error_source;
pub mod guardian;
pub mod planner;

use std::sync::Arc;

pub use approval::ApprovalGate;
pub use error_source::{ErrorSource, InMemoryErrorSource, Severity, SeverityCounts};
pub use guardian::AnalyzeErrors;
pub use planner::DraftPlan;

use crate::engine::MissionEngine;

/// Register every built-in capability on `engine`.
pub fn register_defaults(engine: &MissionEngine, error_source: Arc<dyn ErrorSource>) {
    engine.register_capability(Arc::new(AnalyzeErrors::new(error_source)));
    engine.register_capability(Arc::new(DraftPlan::new()));
    engine.register_capability(Arc::new(ApprovalGate::new()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MissionStore;
    use events::MissionEventBus;

    #[test]
    fn test_register_defaults() {
        let engine = MissionEngine::new(Arc::new(MissionStore::new()), MissionEventBus::new());
        register_defaults(&engine, Arc::new(InMemoryErrorSource::default()));

        assert_eq!(
            engine.capability_keys(),
            vec!["guardian.analyze-errors", "human.approve", "kai.draft-plan"]
        );
    }
}
