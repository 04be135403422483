//! Mission run records.
//!
//! A [`MissionRun`] is created once per submitted definition. Its phase and
//! step runs are materialized up front and never added or removed; only
//! their status, timing and output change afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::definition::{MissionDefinition, PhaseDefinition, StepDefinition};
use super::log::LogEntry;
use super::status::{MissionStatus, PhaseStatus, StepStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct MissionRun {
    pub id: Uuid,
    pub definition: MissionDefinition,
    pub status: MissionStatus,
    /// Percentage of completed steps, 0-100
    pub progress: u8,
    pub phases: Vec<PhaseRun>,
    /// Newest entry first
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MissionRun {
    pub fn new(definition: MissionDefinition) -> Self {
        Self::with_id(Uuid::new_v4(), definition)
    }

    /// Materialize the full run tree for `definition`, every node pending.
    pub fn with_id(id: Uuid, definition: MissionDefinition) -> Self {
        let phases = definition
            .phases
            .iter()
            .cloned()
            .map(PhaseRun::new)
            .collect();

        Self {
            id,
            definition,
            status: MissionStatus::default(),
            progress: 0,
            phases,
            logs: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }

    pub fn completed_steps(&self) -> usize {
        self.steps()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Progress derived from the current step statuses.
    pub fn computed_progress(&self) -> u8 {
        progress_percent(self.completed_steps(), self.total_steps())
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepRun> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }

    pub fn phase(&self, phase_id: Uuid) -> Option<&PhaseRun> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    pub fn step(&self, step_id: Uuid) -> Option<&StepRun> {
        self.steps().find(|s| s.id == step_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PhaseRun {
    pub id: Uuid,
    pub definition: PhaseDefinition,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRun>,
}

impl PhaseRun {
    pub fn new(definition: PhaseDefinition) -> Self {
        let id = Uuid::new_v4();
        let steps = definition
            .steps
            .iter()
            .cloned()
            .map(|step| StepRun::new(id, step))
            .collect();

        Self {
            id,
            definition,
            status: PhaseStatus::default(),
            started_at: None,
            completed_at: None,
            steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct StepRun {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub definition: StepDefinition,
    pub status: StepStatus,
    /// Number of times the step entered `running`
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "typescript", ts(type = "unknown"))]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRun {
    pub fn new(phase_id: Uuid, definition: StepDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase_id,
            definition,
            status: StepStatus::default(),
            attempts: 0,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.definition.agent_id
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, output: Option<serde_json::Value>) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        if output.is_some() {
            self.output = output;
        }
    }

    pub fn fail(&mut self, error: impl Into<String>, output: Option<serde_json::Value>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        if output.is_some() {
            self.output = output;
        }
    }

    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    /// Park the step until a human approves or rejects it.
    pub fn suspend(&mut self, output: Option<serde_json::Value>) {
        self.status = StepStatus::WaitingHuman;
        if output.is_some() {
            self.output = output;
        }
    }
}

/// `completed / total * 100`, rounded half up. An empty mission reports 0.
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total);
    ((completed * 100 + total / 2) / total) as u8
}
