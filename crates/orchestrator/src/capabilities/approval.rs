//! `human.approve`: explicit approval gate.

use async_trait::async_trait;
use mission_core::CapabilityId;

use crate::capability::{Capability, CapabilityContext, CapabilityError, CapabilityResult};

pub const AGENT: &str = "human";
pub const APPROVE: &str = "approve";

/// Always suspends the step; the step input, if any, is passed through as
/// output so the reviewer sees what they are approving.
#[derive(Debug, Default)]
pub struct ApprovalGate;

impl ApprovalGate {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Capability for ApprovalGate {
    fn id(&self) -> CapabilityId {
        CapabilityId::new(AGENT, APPROVE)
    }

    async fn execute(
        &self,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, CapabilityError> {
        let mut result = CapabilityResult::waiting_human().with_log(format!(
            "Awaiting human approval: {}",
            ctx.step.definition.display_title()
        ));
        if let Some(input) = ctx.input() {
            result = result.with_output(input.clone());
        }
        Ok(result)
    }
}
