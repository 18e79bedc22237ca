use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Heal error: {0}")]
    Heal(String),

    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Quota exceeded for '{operation}': {message}")]
    QuotaExceeded { operation: String, message: String },

    #[error("Job failed: {0}")]
    Job(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wire error code carried in outbound error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::ControlPlane(_) => "EXTERNAL_SERVICE_ERROR",
            Error::Config(_) => "CONFIGURATION_ERROR",
            _ => "EXECUTION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let quota = Error::QuotaExceeded {
            operation: "send-message".to_string(),
            message: "daily limit reached".to_string(),
        };
        assert_eq!(quota.code(), "QUOTA_EXCEEDED");
        assert_eq!(Error::Validation("bad".into()).code(), "VALIDATION_ERROR");
        assert_eq!(Error::Queue("x".into()).code(), "EXECUTION_ERROR");
    }

    #[test]
    fn test_quota_error_message() {
        let quota = Error::QuotaExceeded {
            operation: "scrape".to_string(),
            message: "limit".to_string(),
        };
        assert!(quota.to_string().contains("scrape"));
        assert!(quota.to_string().contains("limit"));
    }
}
