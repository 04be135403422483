use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Identifier of a capability: an agent id paired with one of its actions.
///
/// Rendered and parsed as `"<agentId>.<action>"`. The agent id may not
/// contain a dot; everything after the first dot is the action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityId {
    agent: String,
    action: String,
}

impl CapabilityId {
    pub fn new(agent: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            action: action.into(),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.agent, self.action)
    }
}

impl FromStr for CapabilityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((agent, action)) if !agent.trim().is_empty() && !action.trim().is_empty() => {
                Ok(Self::new(agent, action))
            }
            _ => Err(CoreError::InvalidCapabilityId(s.to_string())),
        }
    }
}

impl TryFrom<String> for CapabilityId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CapabilityId> for String {
    fn from(id: CapabilityId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id: CapabilityId = "guardian.analyze-errors".parse().unwrap();
        assert_eq!(id.agent(), "guardian");
        assert_eq!(id.action(), "analyze-errors");
        assert_eq!(id.to_string(), "guardian.analyze-errors");
    }

    #[test]
    fn test_action_may_contain_dots() {
        let id: CapabilityId = "kai.plan.draft".parse().unwrap();
        assert_eq!(id.agent(), "kai");
        assert_eq!(id.action(), "plan.draft");
    }

    #[test]
    fn test_rejects_malformed_ids() {
        for raw in ["guardian", ".analyze", "guardian.", "", " . "] {
            assert_eq!(
                raw.parse::<CapabilityId>(),
                Err(CoreError::InvalidCapabilityId(raw.to_string()))
            );
        }
    }

    #[test]
    fn test_serde_as_string() {
        let id = CapabilityId::new("kai", "draft-plan");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"kai.draft-plan\"");

        let back: CapabilityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<CapabilityId>("\"nodot\"").is_err());
    }
}
