use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid capability id '{0}': expected '<agentId>.<action>'")]
    InvalidCapabilityId(String),

    #[error("Invalid mission definition: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::InvalidCapabilityId("guardian".to_string());
        assert!(error.to_string().contains("'guardian'"));

        let error = CoreError::Validation("objective is empty".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid mission definition: objective is empty"
        );
    }
}
