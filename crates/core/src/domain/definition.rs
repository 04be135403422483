//! Declarative mission definitions.
//!
//! Definitions are authored outside the engine (JSON or TOML files, UI
//! forms) and are treated as immutable input once submitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capability_id::CapabilityId;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct MissionDefinition {
    pub objective: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "typescript", ts(type = "Record<string, unknown> | null"))]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub phases: Vec<PhaseDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_criteria: Option<Vec<String>>,
}

impl MissionDefinition {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            created_at: Utc::now(),
            metadata: None,
            phases: Vec::new(),
            exit_criteria: None,
        }
    }

    pub fn with_phase(mut self, phase: PhaseDefinition) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_exit_criteria(mut self, criteria: Vec<String>) -> Self {
        self.exit_criteria = Some(criteria);
        self
    }

    pub fn total_steps(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }

    /// Every capability referenced by the definition, in step order, without
    /// duplicates.
    pub fn capability_ids(&self) -> Vec<CapabilityId> {
        let mut ids: Vec<CapabilityId> = Vec::new();
        for step in self.phases.iter().flat_map(|p| p.steps.iter()) {
            let id = step.capability_id();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Structural checks for externally authored definitions.
    ///
    /// The engine itself runs any definition; unresolvable steps simply fail
    /// at run time. This is for loaders that want to reject bad input early.
    pub fn validate(&self) -> Result<()> {
        if self.objective.trim().is_empty() {
            return Err(CoreError::Validation("objective is empty".to_string()));
        }
        for (phase_index, phase) in self.phases.iter().enumerate() {
            if phase.name.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "phase {} has no name",
                    phase_index + 1
                )));
            }
            for (step_index, step) in phase.steps.iter().enumerate() {
                step.capability_key().parse::<CapabilityId>().map_err(|_| {
                    CoreError::Validation(format!(
                        "step {} of phase '{}' has an invalid capability '{}'",
                        step_index + 1,
                        phase.name,
                        step.capability_key()
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Carried for forward compatibility. Phases always run their steps in
    /// order regardless of this flag.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl PhaseDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parallel: false,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub agent_id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "typescript", ts(type = "unknown"))]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub requires_approval: bool,
    /// Not consumed by the engine; steps run exactly once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl StepDefinition {
    pub fn new(agent_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            action: action.into(),
            title: None,
            description: None,
            input: None,
            requires_approval: false,
            retry: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// The raw `"<agentId>.<action>"` registry key.
    pub fn capability_key(&self) -> String {
        format!("{}.{}", self.agent_id, self.action)
    }

    pub fn capability_id(&self) -> CapabilityId {
        CapabilityId::new(&self.agent_id, &self.action)
    }

    /// Title if authored, otherwise the capability key.
    pub fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| self.capability_key())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> MissionDefinition {
        MissionDefinition::new("Stabilize the release")
            .with_phase(
                PhaseDefinition::new("Assess")
                    .with_step(StepDefinition::new("guardian", "analyze-errors"))
                    .with_step(StepDefinition::new("kai", "draft-plan").with_title("Draft plan")),
            )
            .with_phase(
                PhaseDefinition::new("Approve")
                    .with_step(StepDefinition::new("human", "approve").with_approval()),
            )
    }

    #[test]
    fn test_total_steps_and_capabilities() {
        let def = sample().with_phase(
            PhaseDefinition::new("Recheck").with_step(StepDefinition::new("guardian", "analyze-errors")),
        );
        assert_eq!(def.total_steps(), 4);
        assert_eq!(
            def.capability_ids()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["guardian.analyze-errors", "kai.draft-plan", "human.approve"]
        );
    }

    #[test]
    fn test_deserialize_camel_case_json() {
        let raw = json!({
            "objective": "Ship it",
            "phases": [{
                "name": "Build",
                "parallel": true,
                "steps": [{
                    "agentId": "kai",
                    "action": "draft-plan",
                    "requiresApproval": true,
                    "input": {"depth": 2},
                    "retry": {"attempts": 3, "backoff": "exponential", "delayMs": 500}
                }]
            }]
        });

        let def: MissionDefinition = serde_json::from_value(raw).unwrap();
        let phase = &def.phases[0];
        assert!(phase.parallel);
        let step = &phase.steps[0];
        assert_eq!(step.capability_key(), "kai.draft-plan");
        assert!(step.requires_approval);
        assert_eq!(step.input, Some(json!({"depth": 2})));
        assert_eq!(
            step.retry,
            Some(RetryPolicy {
                attempts: 3,
                backoff: BackoffKind::Exponential,
                delay_ms: 500
            })
        );
        assert!(def.exit_criteria.is_none());
    }

    #[test]
    fn test_deserialize_toml() {
        let raw = r#"
objective = "Triage errors"
exitCriteria = ["no critical errors"]

[[phases]]
name = "Inspect"

[[phases.steps]]
agentId = "guardian"
action = "analyze-errors"
title = "Inspect the error log"
"#;
        let def: MissionDefinition = toml::from_str(raw).unwrap();
        assert_eq!(def.objective, "Triage errors");
        assert_eq!(def.phases[0].steps[0].display_title(), "Inspect the error log");
        assert_eq!(def.exit_criteria, Some(vec!["no critical errors".to_string()]));
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());

        let empty = MissionDefinition::new("  ");
        assert!(matches!(empty.validate(), Err(CoreError::Validation(_))));

        let bad_step = MissionDefinition::new("x")
            .with_phase(PhaseDefinition::new("p").with_step(StepDefinition::new("", "act")));
        let err = bad_step.validate().unwrap_err();
        assert!(err.to_string().contains("invalid capability '.act'"));
    }

    #[test]
    fn test_display_title_falls_back_to_key() {
        let step = StepDefinition::new("guardian", "analyze-errors");
        assert_eq!(step.display_title(), "guardian.analyze-errors");
    }
}
