use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// A line in a mission's log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub mission_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(mission_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            mission_id,
            step_id: None,
            agent_id: None,
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(mission_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(mission_id, LogLevel::Info, message)
    }

    pub fn warn(mission_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(mission_id, LogLevel::Warn, message)
    }

    pub fn error(mission_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(mission_id, LogLevel::Error, message)
    }

    /// Attribute the entry to a step and the agent that ran it.
    pub fn for_step(mut self, step_id: Uuid, agent_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id);
        self.agent_id = Some(agent_id.into());
        self
    }
}
