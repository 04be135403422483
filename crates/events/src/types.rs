//! Event types for the mission event system

use chrono::{DateTime, Utc};
use mission_core::{LogEntry, MissionRun, MissionStatus, StepRun};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A mission lifecycle event as delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct MissionEvent {
    /// Position of the event on its bus, starting at 1
    pub sequence: u64,
    /// Mission the event belongs to
    pub mission_id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The event payload
    #[serde(flatten)]
    pub payload: MissionEventPayload,
}

impl MissionEvent {
    /// Create an unsequenced event; the bus assigns the sequence on emit.
    pub fn new(mission_id: Uuid, payload: MissionEventPayload) -> Self {
        Self {
            sequence: 0,
            mission_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// All mission events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type")]
pub enum MissionEventPayload {
    /// A mission run was created
    #[serde(rename = "mission:created")]
    Created { mission: Box<MissionRun> },

    /// Mission status changed
    #[serde(rename = "mission:status-changed")]
    StatusChanged { status: MissionStatus },

    /// Mission progress was recomputed
    #[serde(rename = "mission:progress-changed")]
    ProgressChanged { progress: u8 },

    /// A log entry was appended
    #[serde(rename = "mission:log")]
    Log { entry: LogEntry },

    /// A step changed status
    #[serde(rename = "mission:step-status-changed")]
    StepStatusChanged { step: StepRun },
}

impl MissionEventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "mission:created",
            Self::StatusChanged { .. } => "mission:status-changed",
            Self::ProgressChanged { .. } => "mission:progress-changed",
            Self::Log { .. } => "mission:log",
            Self::StepStatusChanged { .. } => "mission:step-status-changed",
        }
    }
}
