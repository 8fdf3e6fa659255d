use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::VerificationError;
use crate::state::GateVerificationState;
use crate::types::{OperatorRole, OverallStatus};

/// Record of a manual override. Kept on the session and in the audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub reason: String,
    pub actor_role: OperatorRole,
    pub at: DateTime<Utc>,
    /// Automatic verdict that the override replaced
    pub superseded_status: OverallStatus,
}

/// Gatekeeper for manual bypass of a failed automatic verdict.
#[derive(Clone, Debug)]
pub struct OverrideAuthority {
    min_role: OperatorRole,
}

impl OverrideAuthority {
    pub fn new(min_role: OperatorRole) -> Self {
        Self { min_role }
    }

    pub fn min_role(&self) -> OperatorRole {
        self.min_role
    }

    pub fn can_override(&self, status: OverallStatus, role: OperatorRole) -> bool {
        matches!(status, OverallStatus::Failed | OverallStatus::Warning) && role >= self.min_role
    }

    /// Force the session to `passed`.
    ///
    /// Role is checked first, then the reason, then the session status.
    /// A session whose attendance is already marked cannot be overridden.
    /// On any error the state is untouched.
    pub fn override_verdict(
        &self,
        state: &mut GateVerificationState,
        reason: &str,
        actor_role: OperatorRole,
    ) -> Result<OverrideRecord, VerificationError> {
        if actor_role < self.min_role {
            warn!(
                actor_role = %actor_role,
                required = %self.min_role,
                "Override rejected: insufficient role"
            );
            return Err(VerificationError::Unauthorized {
                required: self.min_role,
                actual: actor_role,
            });
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(VerificationError::InvalidInput(
                "override reason must not be empty".into(),
            ));
        }

        let status = state.overall_status;
        if !matches!(status, OverallStatus::Failed | OverallStatus::Warning) {
            return Err(VerificationError::InvalidState(status));
        }
        // A flagged admission already opened the gate.
        if state.attendance_marked {
            return Err(VerificationError::InvalidState(status));
        }

        let record = OverrideRecord {
            reason: reason.to_string(),
            actor_role,
            at: Utc::now(),
            superseded_status: status,
        };

        state.overall_status = OverallStatus::Passed;
        state.override_record = Some(record.clone());
        state.timer.stop();

        warn!(
            session_id = ?state.session_id,
            actor_role = %actor_role,
            superseded = %status,
            reason = %record.reason,
            "Automatic verdict overridden"
        );

        Ok(record)
    }
}
