//! `guardian.analyze-errors`: inspect the error log and report severity counts.

use std::sync::Arc;

use async_trait::async_trait;
use mission_core::CapabilityId;
use serde_json::json;

use super::error_source::ErrorSource;
use crate::capability::{Capability, CapabilityContext, CapabilityError, CapabilityResult};

pub const AGENT: &str = "guardian";
pub const ANALYZE_ERRORS: &str = "analyze-errors";

/// Reads severity counts from an [`ErrorSource`].
///
/// With no critical entries the step completes. Critical entries either
/// fail the step (input `{"failOnCritical": true}`) or park it for a human
/// to review.
pub struct AnalyzeErrors {
    source: Arc<dyn ErrorSource>,
}

impl AnalyzeErrors {
    pub fn new(source: Arc<dyn ErrorSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Capability for AnalyzeErrors {
    fn id(&self) -> CapabilityId {
        CapabilityId::new(AGENT, ANALYZE_ERRORS)
    }

    async fn execute(
        &self,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, CapabilityError> {
        let counts = self.source.severity_counts();
        let summary = format!(
            "Found {} critical, {} error and {} warning entries",
            counts.critical, counts.error, counts.warning
        );
        let output = json!({ "counts": counts, "total": counts.total() });

        if counts.critical == 0 {
            return Ok(CapabilityResult::completed()
                .with_output(output)
                .with_log(summary));
        }

        if ctx.input_flag("failOnCritical") {
            return Ok(CapabilityResult::failed(format!(
                "{} critical errors need attention",
                counts.critical
            ))
            .with_output(output)
            .with_log(summary));
        }

        Ok(CapabilityResult::waiting_human()
            .with_output(output)
            .with_log(summary)
            .with_log("Critical errors present, requesting review"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::error_source::{InMemoryErrorSource, SeverityCounts};
    use mission_core::{MissionDefinition, MissionRun, PhaseDefinition, StepDefinition, StepStatus};

    fn context(input: Option<serde_json::Value>) -> CapabilityContext {
        let mut step = StepDefinition::new(AGENT, ANALYZE_ERRORS);
        step.input = input;
        let mission = MissionRun::new(
            MissionDefinition::new("Triage").with_phase(PhaseDefinition::new("check").with_step(step)),
        );
        let phase = mission.phases[0].clone();
        let step = phase.steps[0].clone();
        CapabilityContext {
            mission,
            phase,
            step,
        }
    }

    fn capability(counts: SeverityCounts) -> AnalyzeErrors {
        AnalyzeErrors::new(Arc::new(InMemoryErrorSource::new(counts)))
    }

    #[tokio::test]
    async fn test_clean_log_completes() {
        let result = capability(SeverityCounts::new(0, 2, 5))
            .execute(&context(None))
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Completed);
        assert!(!result.require_approval);
        assert_eq!(result.output.unwrap()["counts"]["error"], 2);
        assert_eq!(result.logs, vec!["Found 0 critical, 2 error and 5 warning entries"]);
    }

    #[tokio::test]
    async fn test_critical_waits_for_review() {
        let result = capability(SeverityCounts::new(3, 0, 0))
            .execute(&context(None))
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::WaitingHuman);
        assert!(!result.require_approval);
        assert!(result.error_message.is_none());
        assert_eq!(result.output.unwrap()["counts"]["critical"], 3);
    }

    #[tokio::test]
    async fn test_critical_fails_when_asked() {
        let result = capability(SeverityCounts::new(1, 0, 0))
            .execute(&context(Some(json!({"failOnCritical": true}))))
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error_message.as_deref(),
            Some("1 critical errors need attention")
        );
    }

    #[test]
    fn test_id() {
        assert_eq!(
            capability(SeverityCounts::default()).id().to_string(),
            "guardian.analyze-errors"
        );
    }
}
