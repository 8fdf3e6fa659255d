use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::VerificationError;
use crate::state::GateVerificationState;
use crate::traits::AttendanceRecorder;
use crate::types::{
    GateId, MineId, OverallStatus, SessionId, VerificationItemType, VerificationStatus,
};

/// Compliance attached to an attendance record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttendanceCompliance {
    /// Every checkpoint passed automatically
    Compliant,
    /// Admitted with unresolved warnings on these checkpoints
    Flagged { items: Vec<VerificationItemType> },
    /// Admitted through a manual override
    Overridden { reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub employee_id: String,
    pub worker_name: String,
    pub mine_id: MineId,
    pub gate_id: GateId,
    pub marked_at: DateTime<Utc>,
    pub identification_confidence: f64,
    pub compliance: AttendanceCompliance,
}

/// Marks attendance at most once per session.
pub struct AttendanceCommitter {
    recorder: Arc<dyn AttendanceRecorder>,
    warning_allows_attendance: bool,
}

impl AttendanceCommitter {
    pub fn new(recorder: Arc<dyn AttendanceRecorder>, warning_allows_attendance: bool) -> Self {
        Self {
            recorder,
            warning_allows_attendance,
        }
    }

    /// Whether the session currently qualifies for attendance.
    pub fn eligible(&self, state: &GateVerificationState) -> bool {
        if state.attendance_marked || state.identified_worker.is_none() || state.session_id.is_none() {
            return false;
        }
        match state.overall_status {
            OverallStatus::Passed => true,
            OverallStatus::Warning => self.warning_allows_attendance,
            _ => false,
        }
    }

    /// Record attendance if eligible.
    ///
    /// Returns `Ok(false)` without side effects when not eligible, including
    /// every call after a successful one. A recorder failure leaves
    /// `attendance_marked` unset so a later evaluation can retry.
    pub async fn try_mark_attendance(
        &self,
        state: &mut GateVerificationState,
    ) -> Result<bool, VerificationError> {
        if !self.eligible(state) {
            debug!(session_id = ?state.session_id, "Attendance not eligible");
            return Ok(false);
        }

        let record = match Self::build_record(state) {
            Some(record) => record,
            None => return Ok(false),
        };

        if let Err(e) = self.recorder.record_attendance(&record).await {
            warn!(
                session_id = %record.session_id,
                employee_id = %record.employee_id,
                error = %e,
                "Attendance recording failed"
            );
            return Err(VerificationError::AttendanceFailed(e.to_string()));
        }

        state.attendance_marked = true;
        info!(
            session_id = %record.session_id,
            employee_id = %record.employee_id,
            compliance = ?record.compliance,
            "Attendance marked"
        );
        Ok(true)
    }

    /// Compliance the session would be recorded with right now.
    pub fn compliance(state: &GateVerificationState) -> AttendanceCompliance {
        if let Some(ovr) = &state.override_record {
            AttendanceCompliance::Overridden {
                reason: ovr.reason.clone(),
            }
        } else if state.overall_status == OverallStatus::Warning {
            AttendanceCompliance::Flagged {
                items: state
                    .items
                    .resolved(state.mode)
                    .into_iter()
                    .filter(|(_, s)| *s == VerificationStatus::Warning)
                    .map(|(item, _)| item)
                    .collect(),
            }
        } else {
            AttendanceCompliance::Compliant
        }
    }

    fn build_record(state: &GateVerificationState) -> Option<AttendanceRecord> {
        let worker = state.identified_worker.as_ref()?;
        let session_id = state.session_id.clone()?;
        let compliance = Self::compliance(state);

        Some(AttendanceRecord {
            session_id,
            employee_id: worker.employee_id.clone(),
            worker_name: worker.name.clone(),
            mine_id: state.selected_mine_id.clone(),
            gate_id: state.selected_gate_id.clone(),
            marked_at: Utc::now(),
            identification_confidence: state.identification_confidence,
            compliance,
        })
    }
}
