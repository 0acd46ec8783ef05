use thiserror::Error;

/// Reasons the SQL gateway refuses a candidate statement.
///
/// Every variant is a recoverable, caller-facing condition. The candidate
/// text is discarded on any of them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("SQL is empty")]
    EmptyInput,

    #[error("Forbidden SQL operation detected: {0}")]
    ForbiddenOperation(String),

    #[error("SQL could not be parsed: {0}")]
    UnparsableSql(String),

    #[error("Only a single SELECT statement is allowed")]
    NotASelect,

    #[error("Table reference must be schema-qualified: {0}")]
    UnqualifiedTable(String),

    #[error("Table not allowed: {0}")]
    TableNotAllowed(String),

    #[error("LIMIT must be a non-negative integer literal")]
    InvalidLimit,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Question cannot be empty.")]
    EmptyQuestion,

    #[error("Generated SQL rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("LLM error: {0}")]
    Generation(String),

    #[error("Unknown intent: {0}")]
    UnknownIntent(String),

    #[error("Invalid intent parameters: {0}")]
    InvalidIntentParams(String),

    #[error("SQL execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether the failure stems from the request (bad question, unsafe SQL,
    /// failed query) rather than from the service itself.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            GatewayError::Config(_) | GatewayError::Io(_) | GatewayError::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_client_errors() {
        let err = GatewayError::from(ValidationError::TableNotAllowed("public.users".to_string()));
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Generated SQL rejected: Table not allowed: public.users"
        );
    }

    #[test]
    fn test_config_errors_are_server_errors() {
        assert!(!GatewayError::Config("DATABASE_URL not set".to_string()).is_client_error());
        assert!(GatewayError::Execution("relation does not exist".to_string()).is_client_error());
    }
}
