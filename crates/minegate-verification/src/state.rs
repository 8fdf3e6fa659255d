use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authority::OverrideRecord;
use crate::checkpoint::CheckpointBoard;
use crate::timer::SessionTimer;
use crate::types::{GateId, MineId, OverallStatus, SessionId, SessionMode, Worker};
use crate::verdict::{Verdict, VerdictAggregator};

/// Aggregate state of one gate verification session.
///
/// Owned by a single controller; the UI receives clones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateVerificationState {
    pub items: CheckpointBoard,
    pub overall_status: OverallStatus,
    pub identified_worker: Option<Worker>,
    /// Confidence of the face match that identified the worker, in [0, 1]
    pub identification_confidence: f64,
    pub attendance_marked: bool,
    pub timer: SessionTimer,
    pub session_id: Option<SessionId>,
    pub selected_gate_id: GateId,
    pub selected_mine_id: MineId,
    pub mode: SessionMode,
    pub override_record: Option<OverrideRecord>,
    pub is_capturing: bool,
    /// Backend entry created by the most recent detection
    pub last_entry_id: Option<String>,
}

impl GateVerificationState {
    pub fn new(mine_id: MineId, gate_id: GateId) -> Self {
        Self {
            items: CheckpointBoard::new(),
            overall_status: OverallStatus::Idle,
            identified_worker: None,
            identification_confidence: 0.0,
            attendance_marked: false,
            timer: SessionTimer::new(),
            session_id: None,
            selected_gate_id: gate_id,
            selected_mine_id: mine_id,
            mode: SessionMode::Full,
            override_record: None,
            is_capturing: false,
            last_entry_id: None,
        }
    }

    pub fn time_remaining(&self) -> u32 {
        self.timer.time_remaining()
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer.is_running()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.timer.start_time()
    }

    /// A session is open while its window is still counting down.
    pub fn is_open(&self) -> bool {
        self.session_id.is_some() && self.timer.is_running()
    }

    pub fn is_active_session(&self, session_id: &SessionId) -> bool {
        self.session_id.as_ref() == Some(session_id)
    }

    pub fn is_overridden(&self) -> bool {
        self.override_record.is_some()
    }

    /// Current checkpoint aggregation, ignoring any override.
    pub fn verdict(&self) -> Verdict {
        if self.session_id.is_none() {
            return Verdict::idle();
        }
        VerdictAggregator::aggregate(&self.items, self.mode, self.identified_worker.is_some())
    }

    /// Back to idle, keeping the gate selection.
    pub fn clear(&mut self) {
        *self = Self::new(self.selected_mine_id.clone(), self.selected_gate_id.clone());
    }
}
