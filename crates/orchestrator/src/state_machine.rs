use mission_core::{MissionStatus, PhaseStatus, StepStatus};

use crate::error::{OrchestratorError, Result};

pub struct MissionStateMachine;

impl MissionStateMachine {
    pub fn validate_transition(from: &MissionStatus, to: &MissionStatus) -> Result<()> {
        if Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_transition("mission", from, to))
        }
    }

    fn allowed_transitions(from: &MissionStatus) -> Vec<MissionStatus> {
        use MissionStatus::*;
        match from {
            Pending => vec![Running, Cancelled],
            Running => vec![Completed, Failed, WaitingHuman, Paused, Blocked, Cancelled],
            WaitingHuman => vec![Running, Failed, Cancelled],
            Paused => vec![Running, Failed, Cancelled],
            Blocked => vec![Running, Failed, Cancelled],
            Completed | Failed | Cancelled => vec![],
        }
    }

    pub fn can_transition(from: &MissionStatus, to: &MissionStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

pub struct PhaseStateMachine;

impl PhaseStateMachine {
    pub fn validate_transition(from: &PhaseStatus, to: &PhaseStatus) -> Result<()> {
        if Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_transition("phase", from, to))
        }
    }

    fn allowed_transitions(from: &PhaseStatus) -> Vec<PhaseStatus> {
        use PhaseStatus::*;
        match from {
            Pending => vec![Running],
            Running => vec![Completed, Failed, WaitingHuman],
            WaitingHuman => vec![Running, Failed],
            Completed | Failed => vec![],
        }
    }

    pub fn can_transition(from: &PhaseStatus, to: &PhaseStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

pub struct StepStateMachine;

impl StepStateMachine {
    pub fn validate_transition(from: &StepStatus, to: &StepStatus) -> Result<()> {
        if Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_transition("step", from, to))
        }
    }

    fn allowed_transitions(from: &StepStatus) -> Vec<StepStatus> {
        use StepStatus::*;
        match from {
            Pending => vec![Running, Skipped],
            Running => vec![Completed, Failed, Skipped, WaitingHuman],
            // Only a human decision moves a suspended step on.
            WaitingHuman => vec![Completed, Failed],
            Completed | Failed | Skipped => vec![],
        }
    }

    pub fn can_transition(from: &StepStatus, to: &StepStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mission_valid_transitions() {
        assert!(MissionStateMachine::can_transition(
            &MissionStatus::Pending,
            &MissionStatus::Running
        ));
        assert!(MissionStateMachine::can_transition(
            &MissionStatus::Running,
            &MissionStatus::WaitingHuman
        ));
        assert!(MissionStateMachine::can_transition(
            &MissionStatus::WaitingHuman,
            &MissionStatus::Running
        ));
        assert!(MissionStateMachine::can_transition(
            &MissionStatus::Paused,
            &MissionStatus::Cancelled
        ));
    }

    #[test]
    fn test_mission_never_returns_to_pending() {
        for from in [
            MissionStatus::Running,
            MissionStatus::WaitingHuman,
            MissionStatus::Blocked,
            MissionStatus::Paused,
            MissionStatus::Completed,
            MissionStatus::Failed,
            MissionStatus::Cancelled,
        ] {
            assert!(!MissionStateMachine::can_transition(
                &from,
                &MissionStatus::Pending
            ));
        }
    }

    #[test]
    fn test_mission_terminal_states_are_final() {
        for from in [
            MissionStatus::Completed,
            MissionStatus::Failed,
            MissionStatus::Cancelled,
        ] {
            assert!(!MissionStateMachine::can_transition(
                &from,
                &MissionStatus::Running
            ));
        }
        let err = MissionStateMachine::validate_transition(
            &MissionStatus::Completed,
            &MissionStatus::Failed,
        )
        .unwrap_err();
        assert!(err.to_string().contains("completed to failed"));
    }

    #[test]
    fn test_step_transitions() {
        assert!(StepStateMachine::can_transition(
            &StepStatus::Pending,
            &StepStatus::Running
        ));
        assert!(StepStateMachine::can_transition(
            &StepStatus::Running,
            &StepStatus::WaitingHuman
        ));
        assert!(StepStateMachine::can_transition(
            &StepStatus::WaitingHuman,
            &StepStatus::Completed
        ));
        assert!(!StepStateMachine::can_transition(
            &StepStatus::Pending,
            &StepStatus::Completed
        ));
        assert!(!StepStateMachine::can_transition(
            &StepStatus::Running,
            &StepStatus::Pending
        ));
        assert!(!StepStateMachine::can_transition(
            &StepStatus::Completed,
            &StepStatus::Running
        ));
    }

    #[test]
    fn test_phase_transitions() {
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Pending,
            &PhaseStatus::Running
        ));
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::WaitingHuman,
            &PhaseStatus::Running
        ));
        assert!(!PhaseStateMachine::can_transition(
            &PhaseStatus::Failed,
            &PhaseStatus::Running
        ));
    }
}
