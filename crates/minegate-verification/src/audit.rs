use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attendance::AttendanceCompliance;
use crate::authority::OverrideRecord;
use crate::types::{
    EvidenceChannel, GateId, MineId, OverallStatus, SessionId, SessionMode, VerificationItemType,
    VerificationStatus,
};

/// Things that happen during a verification session.
///
/// `VerdictReached` is only written for automatic verdicts; a manual bypass
/// is always an `Overridden` entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionStarted {
        mode: SessionMode,
        mine_id: MineId,
        gate_id: GateId,
        window_secs: u32,
    },
    ChannelMarked {
        item: VerificationItemType,
        channel: EvidenceChannel,
        status: VerificationStatus,
    },
    EvidenceRejected {
        reason: String,
    },
    DetectionFailed {
        reason: String,
    },
    WorkerIdentified {
        employee_id: String,
        confidence: f64,
    },
    IdentityConflict {
        kept: String,
        rejected: String,
        confidence: f64,
    },
    AttendanceMarked {
        employee_id: String,
        compliance: AttendanceCompliance,
    },
    AttendanceFailed {
        reason: String,
    },
    VerdictReached {
        status: OverallStatus,
        passed_count: usize,
        total_checks: usize,
    },
    Overridden(OverrideRecord),
    OverrideSyncFailed {
        entry_id: String,
        reason: String,
    },
    TimedOut {
        status: OverallStatus,
    },
    StaleResponseDropped {
        capture_id: u64,
    },
    Reset,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub event: AuditEvent,
}

/// Default number of entries kept in memory.
pub const DEFAULT_RETENTION: usize = 10_000;

/// Append-only detection log and audit trail.
///
/// No delete or modify operations exist. The trail keeps at most `retention`
/// entries in memory: once full, each append evicts the oldest entry.
/// Sequence numbers keep increasing across evictions, so a gap at the front
/// of [`entries`](Self::entries) means older entries were evicted.
#[derive(Debug)]
pub struct AuditTrail {
    entries: VecDeque<AuditEntry>,
    retention: usize,
    next_seq: u64,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            retention: retention.max(1),
            next_seq: 0,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Append an entry and return its sequence number.
    pub fn append(&mut self, session_id: Option<SessionId>, event: AuditEvent) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.entries.len() == self.retention {
            self.entries.pop_front();
        }
        self.entries.push_back(AuditEntry {
            seq,
            at: Utc::now(),
            session_id,
            event,
        });
        seq
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> + '_ {
        self.entries.iter()
    }

    /// Entries evicted so far.
    pub fn evicted(&self) -> u64 {
        self.next_seq - self.entries.len() as u64
    }

    pub fn for_session(&self, session_id: &SessionId) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.session_id.as_ref() == Some(session_id))
            .collect()
    }

    pub fn overrides(&self, session_id: &SessionId) -> Vec<&OverrideRecord> {
        self.for_session(session_id)
            .into_iter()
            .filter_map(|e| match &e.event {
                AuditEvent::Overridden(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperatorRole;

    #[test]
    fn append_assigns_sequence() {
        let mut trail = AuditTrail::new();
        let sid = SessionId::generate();
        assert_eq!(trail.append(Some(sid.clone()), AuditEvent::Reset), 0);
        assert_eq!(trail.append(None, AuditEvent::Reset), 1);
        assert_eq!(trail.len(), 2);
        assert_eq!(trail.for_session(&sid).len(), 1);
    }

    #[test]
    fn retention_evicts_oldest() {
        let mut trail = AuditTrail::with_retention(3);
        let sid = SessionId::generate();
        for _ in 0..5 {
            trail.append(Some(sid.clone()), AuditEvent::Reset);
        }

        assert_eq!(trail.len(), 3);
        assert_eq!(trail.evicted(), 2);
        let seqs: Vec<u64> = trail.entries().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert_eq!(trail.append(None, AuditEvent::Reset), 5);
        assert_eq!(trail.len(), 3);
    }

    #[test]
    fn overrides_are_queryable() {
        let mut trail = AuditTrail::new();
        let sid = SessionId::generate();
        trail.append(
            Some(sid.clone()),
            AuditEvent::VerdictReached {
                status: OverallStatus::Failed,
                passed_count: 3,
                total_checks: 4,
            },
        );
        trail.append(
            Some(sid.clone()),
            AuditEvent::Overridden(OverrideRecord {
                reason: "checked by hand".into(),
                actor_role: OperatorRole::Manager,
                at: Utc::now(),
                superseded_status: OverallStatus::Failed,
            }),
        );

        let overrides = trail.overrides(&sid);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].reason, "checked by hand");
    }
}
