use mission_core::CoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Mission not found: {0}")]
    MissionNotFound(Uuid),

    #[error("Mission already exists: {0}")]
    MissionExists(Uuid),

    #[error("Step {step_id} not found in mission {mission_id}")]
    StepNotFound { mission_id: Uuid, step_id: Uuid },

    #[error("Step {0} is not waiting for approval")]
    StepNotAwaitingApproval(Uuid),

    #[error("Mission {0} is already being executed")]
    MissionBusy(Uuid),

    #[error("No capability registered for: {}", .0.join(", "))]
    UnknownCapabilities(Vec<String>),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl OrchestratorError {
    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OrchestratorError::invalid_transition("mission", "completed", "running");
        assert_eq!(
            err.to_string(),
            "Invalid mission transition from completed to running"
        );

        let err = OrchestratorError::UnknownCapabilities(vec![
            "kai.draft-plan".to_string(),
            "human.approve".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "No capability registered for: kai.draft-plan, human.approve"
        );
    }

    #[test]
    fn test_from_core_error() {
        let err: OrchestratorError = CoreError::Validation("objective is empty".into()).into();
        assert!(matches!(err, OrchestratorError::Core(_)));
    }
}
