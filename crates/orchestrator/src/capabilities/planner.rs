//! `kai.draft-plan`: outline the mission as a numbered plan.

use async_trait::async_trait;
use mission_core::CapabilityId;
use serde_json::json;

use crate::capability::{Capability, CapabilityContext, CapabilityError, CapabilityResult};

pub const AGENT: &str = "kai";
pub const DRAFT_PLAN: &str = "draft-plan";

#[derive(Debug, Default)]
pub struct DraftPlan;

impl DraftPlan {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Capability for DraftPlan {
    fn id(&self) -> CapabilityId {
        CapabilityId::new(AGENT, DRAFT_PLAN)
    }

    async fn execute(
        &self,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, CapabilityError> {
        let objective = ctx.objective().trim();
        if objective.is_empty() {
            return Err(CapabilityError::InvalidInput(
                "mission has no objective to plan for".to_string(),
            ));
        }

        let mut plan = Vec::new();
        for phase in &ctx.mission.phases {
            for step in &phase.steps {
                plan.push(format!(
                    "{}. {}: {}",
                    plan.len() + 1,
                    phase.name(),
                    step.definition.display_title()
                ));
            }
        }

        let mut result = CapabilityResult::completed().with_log(format!(
            "Drafted a {}-step plan for: {}",
            plan.len(),
            objective
        ));
        if let Some(criteria) = &ctx.mission.definition.exit_criteria {
            result = result.with_log(format!("Exit criteria: {}", criteria.join("; ")));
        }

        Ok(result.with_output(json!({
            "objective": objective,
            "plan": plan,
            "exitCriteria": ctx.mission.definition.exit_criteria,
        })))
    }
}
