use thiserror::Error;

use crate::types::{OperatorRole, OverallStatus};

/// Errors from gate verification sessions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    #[error("role {actual} may not override; requires {required} or higher")]
    Unauthorized {
        required: OperatorRole,
        actual: OperatorRole,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("detection unavailable: {0}")]
    DetectionUnavailable(String),

    #[error("verification window of {window_secs}s elapsed")]
    Timeout { window_secs: u32 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no active verification session")]
    NoActiveSession,

    #[error("operation not allowed while session is {0}")]
    InvalidState(OverallStatus),

    #[error("attendance recording failed: {0}")]
    AttendanceFailed(String),

    #[error("session runtime has shut down")]
    RuntimeClosed,
}

pub type VerificationResult<T> = Result<T, VerificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = VerificationError::Unauthorized {
            required: OperatorRole::Manager,
            actual: OperatorRole::Worker,
        };
        assert!(err.to_string().contains("manager"));

        let err = VerificationError::InvalidState(OverallStatus::Verifying);
        assert!(err.to_string().contains("verifying"));
    }
}
