use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Reject definitions that reference unregistered capabilities (or fail
    /// structural validation) before a run is created.
    pub strict_capabilities: bool,
    /// Suspend a completed step when its definition sets `requiresApproval`
    /// or its result sets `requireApproval`. Off by default; only
    /// `waiting-human` results suspend a step otherwise.
    pub honor_step_approval: bool,
    /// Buffer size of the async event stream.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_capabilities: false,
            honor_step_approval: false,
            event_channel_capacity: 1000,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strict_capabilities(mut self, strict: bool) -> Self {
        self.strict_capabilities = strict;
        self
    }

    pub fn with_step_approval(mut self, honor: bool) -> Self {
        self.honor_step_approval = honor;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(!config.strict_capabilities);
        assert!(!config.honor_step_approval);
        assert_eq!(config.event_channel_capacity, 1000);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_strict_capabilities(true)
            .with_step_approval(true)
            .with_event_channel_capacity(16);
        assert!(config.strict_capabilities);
        assert!(config.honor_step_approval);
        assert_eq!(config.event_channel_capacity, 16);
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"strict_capabilities": true}"#).unwrap();
        assert!(config.strict_capabilities);
        assert!(!config.honor_step_approval);
        assert_eq!(config.event_channel_capacity, 1000);
    }
}
