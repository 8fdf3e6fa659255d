use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::attendance::AttendanceCommitter;
use crate::audit::{AuditEvent, AuditTrail};
use crate::authority::{OverrideAuthority, OverrideRecord};
use crate::checkpoint::ChannelEvidence;
use crate::config::VerificationConfig;
use crate::detection::{DetectionInterpreter, DetectionMode, DetectionResponse, IdentityCandidate};
use crate::error::{VerificationError, VerificationResult};
use crate::rfid::RfidScan;
use crate::state::GateVerificationState;
use crate::timer::TickOutcome;
use crate::traits::{AttendanceRecorder, GateApi};
use crate::types::{
    EvidenceChannel, Frame, GateId, MineId, OperatorRole, OverallStatus, SessionId, SessionMode,
    VerificationItemType, VerificationStatus, Worker,
};
use crate::verdict::Verdict;

/// Events published to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerificationEvent {
    StatusChanged {
        session_id: SessionId,
        status: OverallStatus,
    },
    WorkerIdentified {
        session_id: SessionId,
        worker: Worker,
        confidence: f64,
    },
    AttendanceMarked {
        session_id: SessionId,
        employee_id: String,
    },
    VerificationComplete {
        session_id: SessionId,
        success: bool,
        worker: Option<Worker>,
    },
    GateOpened {
        session_id: SessionId,
        gate_id: GateId,
    },
    Overridden {
        session_id: SessionId,
        record: OverrideRecord,
    },
}

/// Identifies one in-flight snapshot detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureTicket {
    pub session_id: SessionId,
    pub capture_id: u64,
}

/// Everything needed to run a detection outside the controller.
#[derive(Clone, Debug)]
pub struct CaptureRequest {
    pub ticket: CaptureTicket,
    pub gate_id: GateId,
    pub frame: Frame,
    pub mode: DetectionMode,
}

#[derive(Clone, Debug)]
pub enum CaptureStart {
    Dispatched(CaptureRequest),
    /// No frame to send; ML channels were marked `warning`
    Unavailable(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaptureOutcome {
    Applied(Verdict),
    /// Detection could not run; ML channels were marked `warning`
    Unavailable(String),
    /// Response arrived for a session or capture that is no longer current
    Stale,
}

/// Orchestrates one gate's verification sessions.
///
/// Owns the session state outright; every mutation goes through `&mut self`,
/// and asynchronous evidence is matched against the active session id before
/// it is applied.
pub struct GateVerificationController {
    config: VerificationConfig,
    state: GateVerificationState,
    interpreter: DetectionInterpreter,
    committer: AttendanceCommitter,
    authority: OverrideAuthority,
    gate_api: Arc<dyn GateApi>,
    audit: AuditTrail,
    event_tx: broadcast::Sender<VerificationEvent>,
    operator_role: OperatorRole,
    last_frame: Option<Frame>,
    in_flight: Option<CaptureTicket>,
    next_capture_id: u64,
    /// Outcome already announced for the session, if any.
    completed: Option<bool>,
}

impl GateVerificationController {
    pub fn new(
        config: VerificationConfig,
        mine_id: MineId,
        gate_id: GateId,
        gate_api: Arc<dyn GateApi>,
        recorder: Arc<dyn AttendanceRecorder>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let audit = AuditTrail::with_retention(config.audit_retention);
        Self {
            interpreter: config.interpreter(),
            committer: AttendanceCommitter::new(recorder, config.warning_allows_attendance),
            authority: OverrideAuthority::new(config.min_override_role),
            state: GateVerificationState::new(mine_id, gate_id),
            config,
            gate_api,
            audit,
            event_tx,
            operator_role: OperatorRole::Worker,
            last_frame: None,
            in_flight: None,
            next_capture_id: 0,
            completed: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VerificationEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<VerificationEvent> {
        self.event_tx.clone()
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    pub fn state(&self) -> &GateVerificationState {
        &self.state
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn gate_api(&self) -> Arc<dyn GateApi> {
        self.gate_api.clone()
    }

    pub fn verdict(&self) -> Verdict {
        self.state.verdict()
    }

    pub fn passed_count(&self) -> usize {
        self.verdict().passed_count
    }

    pub fn total_checks(&self) -> usize {
        self.verdict().total_checks
    }

    pub fn is_capturing(&self) -> bool {
        self.state.is_capturing
    }

    /// Role of the operator currently at the console.
    pub fn set_operator_role(&mut self, role: OperatorRole) {
        self.operator_role = role;
    }

    /// Whether the current operator may override the current verdict.
    pub fn can_override(&self) -> bool {
        !self.state.attendance_marked
            && self
                .authority
                .can_override(self.state.overall_status, self.operator_role)
    }

    /// Switch gate. Cancels any session on the previous gate.
    pub fn select_gate(&mut self, mine_id: MineId, gate_id: GateId) {
        self.reset_verification();
        info!(mine_id = %mine_id, gate_id = %gate_id, "Gate selected");
        self.state.selected_mine_id = mine_id;
        self.state.selected_gate_id = gate_id;
        self.last_frame = None;
    }

    pub fn start_verification(&mut self) -> VerificationResult<SessionId> {
        self.start(SessionMode::Full)
    }

    pub fn start_rfid_only(&mut self) -> VerificationResult<SessionId> {
        self.start(SessionMode::RfidOnly)
    }

    pub fn start_ml_only(&mut self) -> VerificationResult<SessionId> {
        self.start(SessionMode::MlOnly)
    }

    fn start(&mut self, mode: SessionMode) -> VerificationResult<SessionId> {
        if self.state.is_open() {
            return Err(VerificationError::Conflict(
                "a verification session is already running".into(),
            ));
        }

        self.state.clear();
        self.in_flight = None;
        self.completed = None;

        let session_id = SessionId::generate();
        self.state.session_id = Some(session_id.clone());
        self.state.mode = mode;
        self.state.overall_status = OverallStatus::Verifying;
        self.state.timer.start(self.config.window_secs, Utc::now());

        self.audit.append(
            Some(session_id.clone()),
            AuditEvent::SessionStarted {
                mode,
                mine_id: self.state.selected_mine_id.clone(),
                gate_id: self.state.selected_gate_id.clone(),
                window_secs: self.config.window_secs,
            },
        );
        info!(
            session_id = %session_id,
            gate_id = %self.state.selected_gate_id,
            mode = ?mode,
            window_secs = self.config.window_secs,
            "Verification session started"
        );
        self.emit(VerificationEvent::StatusChanged {
            session_id: session_id.clone(),
            status: OverallStatus::Verifying,
        });

        Ok(session_id)
    }

    /// Return to idle from any state. In-flight captures become stale.
    pub fn reset_verification(&mut self) {
        let previous = self.state.session_id.clone();

        self.state.clear();
        self.in_flight = None;
        self.completed = None;

        if let Some(session_id) = previous {
            self.audit.append(Some(session_id.clone()), AuditEvent::Reset);
            info!(session_id = %session_id, "Verification session reset");
            self.emit(VerificationEvent::StatusChanged {
                session_id,
                status: OverallStatus::Idle,
            });
        }
    }

    /// Buffer the latest camera frame.
    pub fn push_frame(&mut self, frame: Frame) {
        self.last_frame = Some(frame);
    }

    /// Advance the timer of `session_id` by one second.
    ///
    /// Ticks for any other session are ignored.
    pub fn tick(&mut self, session_id: &SessionId) -> TickOutcome {
        if !self.state.is_active_session(session_id) {
            debug!(session_id = %session_id, "Tick for inactive session ignored");
            return TickOutcome::Idle;
        }

        let outcome = self.state.timer.tick();
        if outcome == TickOutcome::Elapsed {
            self.handle_timeout(session_id.clone());
        }
        outcome
    }

    fn handle_timeout(&mut self, session_id: SessionId) {
        if self.in_flight.take().is_some() {
            self.state.items.cancel_sampling(EvidenceChannel::Ml);
        }
        self.state.is_capturing = false;

        if self.state.overall_status == OverallStatus::Verifying {
            self.state.overall_status = OverallStatus::Failed;
            self.emit(VerificationEvent::StatusChanged {
                session_id: session_id.clone(),
                status: OverallStatus::Failed,
            });
        }

        let status = self.state.overall_status;
        self.audit
            .append(Some(session_id.clone()), AuditEvent::TimedOut { status });
        warn!(
            session_id = %session_id,
            status = %status,
            window_secs = self.config.window_secs,
            "Verification window elapsed"
        );
        self.complete(&session_id, false);
    }

    /// Apply a scanner tag read.
    ///
    /// Returns `Ok(false)` when the read is dropped because no session is
    /// open or the session does not use RFID.
    pub async fn apply_rfid_scan(&mut self, scan: RfidScan) -> VerificationResult<bool> {
        let item = scan.item()?;

        let Some(session_id) = self.open_session() else {
            debug!(tag_id = %scan.tag_id, "RFID scan outside an open session ignored");
            return Ok(false);
        };
        if !self.state.mode.accepts(EvidenceChannel::Rfid) {
            debug!(session_id = %session_id, item = %item, "RFID scan ignored in vision-only session");
            return Ok(false);
        }

        let status = match self
            .state
            .identified_worker
            .as_ref()
            .and_then(|w| w.ppe.tag_for(item))
        {
            Some(registered) if registered != scan.tag_id => {
                warn!(
                    session_id = %session_id,
                    item = %item,
                    tag_id = %scan.tag_id,
                    "Tag not registered to identified worker"
                );
                VerificationStatus::Warning
            }
            _ => VerificationStatus::Passed,
        };

        self.mark(
            &session_id,
            item,
            EvidenceChannel::Rfid,
            status,
            Some(ChannelEvidence::RfidTag(scan.tag_id)),
        )?;
        self.evaluate().await;
        Ok(true)
    }

    /// Keyboard-simulated scan (`H`, `V`, `S`), only when enabled.
    pub async fn apply_key(&mut self, key: char) -> VerificationResult<bool> {
        if !self.config.keyboard_rfid {
            return Err(VerificationError::InvalidInput(
                "keyboard rfid simulation is disabled".into(),
            ));
        }
        let scan = RfidScan::from_key(key).ok_or_else(|| {
            VerificationError::InvalidInput(format!("key {:?} is not mapped to a tag", key))
        })?;
        self.apply_rfid_scan(scan).await
    }

    /// Surface a scanner read error on one checkpoint as `warning`.
    pub async fn report_rfid_fault(
        &mut self,
        item: VerificationItemType,
        reason: &str,
    ) -> VerificationResult<()> {
        if !item.has_rfid() {
            return Err(VerificationError::InvalidInput(format!(
                "{} has no rfid channel",
                item
            )));
        }
        let Some(session_id) = self.open_session() else {
            return Ok(());
        };
        if !self.state.mode.accepts(EvidenceChannel::Rfid) {
            return Ok(());
        }

        warn!(session_id = %session_id, item = %item, reason = %reason, "RFID read error");
        self.audit.append(
            Some(session_id.clone()),
            AuditEvent::DetectionFailed {
                reason: format!("rfid {}: {}", item, reason),
            },
        );
        if self.state.items.get(item).rfid_status != VerificationStatus::Passed {
            self.mark(
                &session_id,
                item,
                EvidenceChannel::Rfid,
                VerificationStatus::Warning,
                None,
            )?;
        }
        self.evaluate().await;
        Ok(())
    }

    /// One-shot detection against the supplied or last buffered frame.
    pub async fn capture_snapshot(
        &mut self,
        frame: Option<Frame>,
    ) -> VerificationResult<CaptureOutcome> {
        let request = match self.begin_capture(frame).await? {
            CaptureStart::Dispatched(request) => request,
            CaptureStart::Unavailable(reason) => return Ok(CaptureOutcome::Unavailable(reason)),
        };
        let result = self
            .gate_api
            .detect(&request.gate_id, &request.frame, request.mode)
            .await;
        self.complete_capture(request.ticket, result).await
    }

    /// First half of a snapshot: validate and reserve the single capture slot.
    pub async fn begin_capture(&mut self, frame: Option<Frame>) -> VerificationResult<CaptureStart> {
        let session_id = self
            .state
            .session_id
            .clone()
            .ok_or(VerificationError::NoActiveSession)?;
        if !self.state.is_open() {
            return Err(VerificationError::InvalidState(self.state.overall_status));
        }
        if !self.state.mode.accepts(EvidenceChannel::Ml) {
            return Err(VerificationError::InvalidInput(
                "vision channel is disabled in an rfid-only session".into(),
            ));
        }
        if let Some(ticket) = &self.in_flight {
            return Err(VerificationError::Conflict(format!(
                "capture {} is still in flight",
                ticket.capture_id
            )));
        }

        if let Some(frame) = frame {
            self.last_frame = Some(frame);
        }
        let Some(frame) = self.last_frame.clone() else {
            let reason = "no camera frame available".to_string();
            self.surface_detection_failure(&session_id, &reason);
            self.evaluate().await;
            return Ok(CaptureStart::Unavailable(reason));
        };

        self.next_capture_id += 1;
        let ticket = CaptureTicket {
            session_id,
            capture_id: self.next_capture_id,
        };
        self.in_flight = Some(ticket.clone());
        self.state.is_capturing = true;
        self.state
            .items
            .begin_sampling(EvidenceChannel::Ml, self.state.mode);

        debug!(
            session_id = %ticket.session_id,
            capture_id = ticket.capture_id,
            "Snapshot dispatched"
        );

        Ok(CaptureStart::Dispatched(CaptureRequest {
            ticket,
            gate_id: self.state.selected_gate_id.clone(),
            frame,
            mode: self.config.detection_mode,
        }))
    }

    /// Second half of a snapshot: apply the detection if still relevant.
    pub async fn complete_capture(
        &mut self,
        ticket: CaptureTicket,
        result: Result<DetectionResponse, VerificationError>,
    ) -> VerificationResult<CaptureOutcome> {
        if self.in_flight.as_ref() != Some(&ticket) {
            self.drop_stale(&ticket);
            return Ok(CaptureOutcome::Stale);
        }
        self.in_flight = None;
        self.state.is_capturing = false;
        if !self.state.is_open() {
            self.drop_stale(&ticket);
            return Ok(CaptureOutcome::Stale);
        }
        let session_id = ticket.session_id;

        let response = match result {
            Ok(response) if response.success => response,
            Ok(_) => {
                let reason = "detection backend reported failure".to_string();
                self.surface_detection_failure(&session_id, &reason);
                self.evaluate().await;
                return Ok(CaptureOutcome::Unavailable(reason));
            }
            Err(e) => {
                let reason = e.to_string();
                self.surface_detection_failure(&session_id, &reason);
                self.evaluate().await;
                return Ok(CaptureOutcome::Unavailable(reason));
            }
        };

        let interpretation = self.interpreter.interpret(&response);
        if interpretation.entry_id.is_some() {
            self.state.last_entry_id = interpretation.entry_id.clone();
        }

        let conflicting = match interpretation.candidate {
            Some(candidate) => !self.apply_identity(&session_id, candidate),
            None => false,
        };

        for mark in interpretation.marks {
            let status = if mark.item == VerificationItemType::Face && conflicting {
                VerificationStatus::Warning
            } else {
                mark.status
            };
            let evidence = mark.confidence.map(ChannelEvidence::MlConfidence);
            if let Err(e) = self.mark(&session_id, mark.item, EvidenceChannel::Ml, status, evidence) {
                warn!(session_id = %session_id, item = %mark.item, error = %e, "Detection mark rejected");
                self.audit.append(
                    Some(session_id.clone()),
                    AuditEvent::EvidenceRejected {
                        reason: e.to_string(),
                    },
                );
            }
        }

        self.evaluate().await;
        Ok(CaptureOutcome::Applied(self.state.verdict()))
    }

    /// Manual bypass of a failed or warning verdict.
    pub async fn override_verdict(
        &mut self,
        reason: &str,
        actor_role: OperatorRole,
    ) -> VerificationResult<OverrideRecord> {
        let record = self
            .authority
            .override_verdict(&mut self.state, reason, actor_role)?;
        let Some(session_id) = self.state.session_id.clone() else {
            return Err(VerificationError::NoActiveSession);
        };

        self.in_flight = None;
        self.state.is_capturing = false;

        self.audit
            .append(Some(session_id.clone()), AuditEvent::Overridden(record.clone()));
        self.emit(VerificationEvent::StatusChanged {
            session_id: session_id.clone(),
            status: OverallStatus::Passed,
        });
        self.emit(VerificationEvent::Overridden {
            session_id: session_id.clone(),
            record: record.clone(),
        });

        if let Some(entry_id) = self.state.last_entry_id.clone() {
            if let Err(e) = self.gate_api.override_entry(&entry_id, &record.reason).await {
                warn!(session_id = %session_id, entry_id = %entry_id, error = %e, "Override not mirrored to backend");
                self.audit.append(
                    Some(session_id.clone()),
                    AuditEvent::OverrideSyncFailed {
                        entry_id,
                        reason: e.to_string(),
                    },
                );
            }
        }

        self.commit_attendance(&session_id).await;
        self.complete(&session_id, true);
        Ok(record)
    }

    /// Retry attendance after a recorder failure on an admitted session.
    pub async fn retry_attendance(&mut self) -> VerificationResult<bool> {
        let session_id = self
            .state
            .session_id
            .clone()
            .ok_or(VerificationError::NoActiveSession)?;
        if self.state.attendance_marked {
            return Ok(false);
        }
        Ok(self.commit_attendance(&session_id).await)
    }

    fn open_session(&self) -> Option<SessionId> {
        if self.state.is_open() {
            self.state.session_id.clone()
        } else {
            None
        }
    }

    fn mark(
        &mut self,
        session_id: &SessionId,
        item: VerificationItemType,
        channel: EvidenceChannel,
        status: VerificationStatus,
        evidence: Option<ChannelEvidence>,
    ) -> VerificationResult<()> {
        self.state
            .items
            .mark_channel(item, channel, status, evidence)?;
        self.audit.append(
            Some(session_id.clone()),
            AuditEvent::ChannelMarked {
                item,
                channel,
                status,
            },
        );
        Ok(())
    }

    /// Set the identified worker once. Returns false on a conflicting match.
    fn apply_identity(&mut self, session_id: &SessionId, candidate: IdentityCandidate) -> bool {
        let existing = self
            .state
            .identified_worker
            .as_ref()
            .map(|w| w.employee_id.clone());

        match existing {
            None => {
                info!(
                    session_id = %session_id,
                    employee_id = %candidate.worker.employee_id,
                    confidence = candidate.confidence,
                    "Worker identified"
                );
                self.audit.append(
                    Some(session_id.clone()),
                    AuditEvent::WorkerIdentified {
                        employee_id: candidate.worker.employee_id.clone(),
                        confidence: candidate.confidence,
                    },
                );
                self.state.identified_worker = Some(candidate.worker.clone());
                self.state.identification_confidence = candidate.confidence;
                self.reconcile_tags(session_id);
                self.emit(VerificationEvent::WorkerIdentified {
                    session_id: session_id.clone(),
                    worker: candidate.worker,
                    confidence: candidate.confidence,
                });
                true
            }
            Some(kept) if kept == candidate.worker.employee_id => true,
            Some(kept) => {
                warn!(
                    session_id = %session_id,
                    kept = %kept,
                    rejected = %candidate.worker.employee_id,
                    confidence = candidate.confidence,
                    "Conflicting face match ignored"
                );
                self.audit.append(
                    Some(session_id.clone()),
                    AuditEvent::IdentityConflict {
                        kept,
                        rejected: candidate.worker.employee_id,
                        confidence: candidate.confidence,
                    },
                );
                false
            }
        }
    }

    /// Downgrade RFID passes whose tag is registered to someone else.
    fn reconcile_tags(&mut self, session_id: &SessionId) {
        let Some(worker) = self.state.identified_worker.clone() else {
            return;
        };
        for item in VerificationItemType::PPE {
            let current = self.state.items.get(item);
            let mismatch = match (worker.ppe.tag_for(item), current.rfid_tag_id.as_deref()) {
                (Some(registered), Some(read)) => registered != read,
                _ => false,
            };
            if mismatch && current.rfid_status == VerificationStatus::Passed {
                if let Err(e) = self.mark(
                    session_id,
                    item,
                    EvidenceChannel::Rfid,
                    VerificationStatus::Warning,
                    None,
                ) {
                    warn!(item = %item, error = %e, "Tag reconciliation failed");
                }
            }
        }
    }

    fn surface_detection_failure(&mut self, session_id: &SessionId, reason: &str) {
        warn!(session_id = %session_id, reason = %reason, "Detection unavailable");
        self.audit.append(
            Some(session_id.clone()),
            AuditEvent::DetectionFailed {
                reason: reason.to_string(),
            },
        );
        for item in VerificationItemType::ALL {
            if self.state.items.get(item).ml_status.is_resolved() {
                continue;
            }
            if let Err(e) = self.mark(
                session_id,
                item,
                EvidenceChannel::Ml,
                VerificationStatus::Warning,
                None,
            ) {
                warn!(item = %item, error = %e, "Could not surface detection failure");
            }
        }
    }

    fn drop_stale(&mut self, ticket: &CaptureTicket) {
        debug!(
            session_id = %ticket.session_id,
            capture_id = ticket.capture_id,
            "Stale detection response dropped"
        );
        self.audit.append(
            Some(ticket.session_id.clone()),
            AuditEvent::StaleResponseDropped {
                capture_id: ticket.capture_id,
            },
        );
    }

    /// Re-aggregate an open session and act on the verdict.
    async fn evaluate(&mut self) {
        let Some(session_id) = self.open_session() else {
            return;
        };

        let verdict = self.state.verdict();
        if verdict.overall != self.state.overall_status {
            debug!(
                session_id = %session_id,
                from = %self.state.overall_status,
                to = %verdict.overall,
                passed = verdict.passed_count,
                total = verdict.total_checks,
                "Verdict changed"
            );
            self.state.overall_status = verdict.overall;
            if verdict.overall != OverallStatus::Verifying {
                self.audit.append(
                    Some(session_id.clone()),
                    AuditEvent::VerdictReached {
                        status: verdict.overall,
                        passed_count: verdict.passed_count,
                        total_checks: verdict.total_checks,
                    },
                );
            }
            self.emit(VerificationEvent::StatusChanged {
                session_id: session_id.clone(),
                status: verdict.overall,
            });
        }

        match verdict.overall {
            OverallStatus::Passed => {
                self.state.timer.stop();
                info!(session_id = %session_id, "Verification passed");
                self.commit_attendance(&session_id).await;
                self.complete(&session_id, true);
            }
            OverallStatus::Warning => {
                // Admitted with flagged compliance when policy allows it.
                if self.commit_attendance(&session_id).await {
                    self.state.timer.stop();
                    self.complete(&session_id, true);
                }
            }
            _ => {}
        }
    }

    async fn commit_attendance(&mut self, session_id: &SessionId) -> bool {
        match self.committer.try_mark_attendance(&mut self.state).await {
            Ok(true) => {
                let employee_id = self
                    .state
                    .identified_worker
                    .as_ref()
                    .map(|w| w.employee_id.clone())
                    .unwrap_or_default();
                self.audit.append(
                    Some(session_id.clone()),
                    AuditEvent::AttendanceMarked {
                        employee_id: employee_id.clone(),
                        compliance: AttendanceCommitter::compliance(&self.state),
                    },
                );
                self.emit(VerificationEvent::AttendanceMarked {
                    session_id: session_id.clone(),
                    employee_id,
                });
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.audit.append(
                    Some(session_id.clone()),
                    AuditEvent::AttendanceFailed {
                        reason: e.to_string(),
                    },
                );
                false
            }
        }
    }

    fn complete(&mut self, session_id: &SessionId, success: bool) {
        // A timeout may be followed by an admitting override, never the reverse.
        match self.completed {
            Some(true) => return,
            Some(false) if !success => return,
            _ => {}
        }
        self.completed = Some(success);
        self.emit(VerificationEvent::VerificationComplete {
            session_id: session_id.clone(),
            success,
            worker: self.state.identified_worker.clone(),
        });
        if success {
            info!(session_id = %session_id, gate_id = %self.state.selected_gate_id, "Gate opened");
            self.emit(VerificationEvent::GateOpened {
                session_id: session_id.clone(),
                gate_id: self.state.selected_gate_id.clone(),
            });
        }
    }

    fn emit(&self, event: VerificationEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceCompliance;
    use crate::mocks::{compliant_response, violation_response, MockAttendanceRecorder, MockGateApi};
    use crate::types::PpeRegistration;

    fn worker() -> Worker {
        Worker::new("EMP-001", "R. Kumar")
    }

    fn controller_with(
        config: VerificationConfig,
        api: Arc<MockGateApi>,
        recorder: Arc<MockAttendanceRecorder>,
    ) -> GateVerificationController {
        GateVerificationController::new(
            config,
            MineId("M-1".into()),
            GateId("G-1".into()),
            api,
            recorder,
        )
    }

    fn controller(api: Arc<MockGateApi>) -> GateVerificationController {
        controller_with(
            VerificationConfig::default(),
            api,
            Arc::new(MockAttendanceRecorder::new()),
        )
    }

    fn frame() -> Frame {
        Frame::new("data:image/jpeg;base64,AAAA")
    }

    async fn scan_all(ctl: &mut GateVerificationController) {
        for (tag, kind) in [("T-H", "helmet"), ("T-V", "vest"), ("T-S", "shoes")] {
            assert!(ctl.apply_rfid_scan(RfidScan::new(tag, kind)).await.unwrap());
        }
    }

    #[test]
    fn second_start_conflicts() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.9)));
        let first = ctl.start_verification().unwrap();

        let err = ctl.start_rfid_only().unwrap_err();
        assert!(matches!(err, VerificationError::Conflict(_)));
        assert_eq!(ctl.state().session_id, Some(first));
        assert_eq!(ctl.state().mode, SessionMode::Full);
    }

    #[test]
    fn restart_after_reset_starts_clean() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.9)));
        ctl.start_verification().unwrap();
        ctl.reset_verification();
        ctl.start_verification().unwrap();

        let state = ctl.state();
        assert_eq!(state.overall_status, OverallStatus::Verifying);
        assert_eq!(state.time_remaining(), 30);
        assert!(!state.attendance_marked);
        for item in state.items.iter() {
            assert_eq!(item.rfid_status, VerificationStatus::Pending, "{:?}", item.item_type);
            assert_eq!(item.ml_status, VerificationStatus::Pending, "{:?}", item.item_type);
        }
    }

    #[tokio::test]
    async fn full_session_passes_and_opens_gate() {
        let recorder = Arc::new(MockAttendanceRecorder::new());
        let mut ctl = controller_with(
            VerificationConfig::default(),
            Arc::new(MockGateApi::compliant(worker(), 0.93)),
            recorder.clone(),
        );
        let mut events = ctl.subscribe();
        let session_id = ctl.start_verification().unwrap();

        let outcome = ctl.capture_snapshot(Some(frame())).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Applied(_)));
        assert_eq!(ctl.state().overall_status, OverallStatus::Verifying);

        scan_all(&mut ctl).await;

        let state = ctl.state();
        assert_eq!(state.overall_status, OverallStatus::Passed);
        assert!(state.attendance_marked);
        assert!(!state.is_timer_running());
        assert_eq!(ctl.passed_count(), 4);
        assert_eq!(recorder.call_count(), 1);

        let mut saw_complete = false;
        let mut saw_gate = false;
        while let Ok(event) = events.try_recv() {
            match event {
                VerificationEvent::VerificationComplete { success, worker, .. } => {
                    assert!(success);
                    assert_eq!(worker.map(|w| w.employee_id), Some("EMP-001".to_string()));
                    saw_complete = true;
                }
                VerificationEvent::GateOpened { session_id: sid, .. } => {
                    assert_eq!(sid, session_id);
                    saw_gate = true;
                }
                _ => {}
            }
        }
        assert!(saw_complete && saw_gate);
    }

    #[tokio::test]
    async fn scans_after_pass_are_ignored() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.93)));
        ctl.start_verification().unwrap();
        ctl.capture_snapshot(Some(frame())).await.unwrap();
        scan_all(&mut ctl).await;

        let applied = ctl
            .apply_rfid_scan(RfidScan::new("T-H2", "helmet"))
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(ctl.state().overall_status, OverallStatus::Passed);
    }

    #[tokio::test]
    async fn face_scan_rejected() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.93)));
        ctl.start_verification().unwrap();
        let before = ctl.state().items.clone();

        let err = ctl
            .apply_rfid_scan(RfidScan::new("T-F", "face"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::InvalidInput(_)));
        assert_eq!(ctl.state().items, before);
    }

    #[tokio::test]
    async fn missing_frame_surfaces_warning() {
        let api = Arc::new(MockGateApi::compliant(worker(), 0.93));
        let mut ctl = controller(api.clone());
        ctl.start_ml_only().unwrap();

        let outcome = ctl.capture_snapshot(None).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Unavailable(_)));
        assert_eq!(api.detect_calls(), 0);
        assert_eq!(ctl.state().overall_status, OverallStatus::Warning);
        assert!(ctl
            .audit()
            .entries()
            .any(|e| matches!(e.event, AuditEvent::DetectionFailed { .. })));
    }

    #[tokio::test]
    async fn backend_failure_surfaces_warning() {
        let mut ctl = controller(Arc::new(MockGateApi::unavailable()));
        ctl.start_ml_only().unwrap();

        let outcome = ctl.capture_snapshot(Some(frame())).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Unavailable(_)));
        assert!(!ctl.is_capturing());
        assert_eq!(
            ctl.state().items.get(VerificationItemType::Vest).ml_status,
            VerificationStatus::Warning
        );
        assert_eq!(ctl.state().overall_status, OverallStatus::Warning);
    }

    #[tokio::test]
    async fn capture_rejected_in_rfid_only_session() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.93)));
        ctl.start_rfid_only().unwrap();

        let err = ctl.capture_snapshot(Some(frame())).await.unwrap_err();
        assert!(matches!(err, VerificationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn second_capture_in_flight_conflicts() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.93)));
        ctl.start_verification().unwrap();

        let first = ctl.begin_capture(Some(frame())).await.unwrap();
        assert!(matches!(first, CaptureStart::Dispatched(_)));
        assert!(ctl.is_capturing());

        let err = ctl.begin_capture(None).await.unwrap_err();
        assert!(matches!(err, VerificationError::Conflict(_)));
    }

    #[tokio::test]
    async fn response_after_reset_is_stale() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.93)));
        ctl.start_verification().unwrap();

        let CaptureStart::Dispatched(request) = ctl.begin_capture(Some(frame())).await.unwrap() else {
            panic!("capture not dispatched");
        };
        ctl.reset_verification();
        let second = ctl.start_verification().unwrap();

        let outcome = ctl
            .complete_capture(request.ticket, Ok(compliant_response(worker(), 0.93)))
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Stale);
        assert!(ctl.state().identified_worker.is_none());
        assert_eq!(ctl.state().session_id, Some(second));
        assert_eq!(
            ctl.state().items.get(VerificationItemType::Face).ml_status,
            VerificationStatus::Pending
        );
    }

    #[tokio::test]
    async fn identity_is_sticky() {
        let other = Worker::new("EMP-002", "S. Rao");
        let api = Arc::new(
            MockGateApi::compliant(other, 0.97).then(Ok(violation_response(
                &[VerificationItemType::Helmet],
                Some((worker(), 0.9)),
            ))),
        );
        let mut ctl = controller(api);
        ctl.start_ml_only().unwrap();

        ctl.capture_snapshot(Some(frame())).await.unwrap();
        assert_eq!(ctl.state().overall_status, OverallStatus::Failed);

        ctl.capture_snapshot(None).await.unwrap();
        let state = ctl.state();
        assert_eq!(
            state.identified_worker.as_ref().map(|w| w.employee_id.as_str()),
            Some("EMP-001")
        );
        assert_eq!(
            state.items.get(VerificationItemType::Face).ml_status,
            VerificationStatus::Warning
        );
        assert!(ctl
            .audit()
            .entries()
            .any(|e| matches!(e.event, AuditEvent::IdentityConflict { .. })));
    }

    #[tokio::test]
    async fn unregistered_tag_is_warning() {
        let registered = worker().with_ppe(PpeRegistration {
            helmet_tag: Some("T-H".into()),
            vest_tag: None,
            shoes_tag: None,
        });
        let mut ctl = controller(Arc::new(MockGateApi::compliant(registered, 0.93)));
        ctl.start_verification().unwrap();
        ctl.capture_snapshot(Some(frame())).await.unwrap();

        ctl.apply_rfid_scan(RfidScan::new("T-OTHER", "helmet"))
            .await
            .unwrap();
        assert_eq!(
            ctl.state().items.get(VerificationItemType::Helmet).rfid_status,
            VerificationStatus::Warning
        );
    }

    #[tokio::test]
    async fn timeout_fails_open_session() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.93)));
        let config = VerificationConfig {
            window_secs: 3,
            ..Default::default()
        };
        ctl.config = config;
        let session_id = ctl.start_verification().unwrap();
        let mut events = ctl.subscribe();

        assert_eq!(ctl.tick(&session_id), TickOutcome::Running(2));
        assert_eq!(ctl.tick(&SessionId::generate()), TickOutcome::Idle);
        assert_eq!(ctl.tick(&session_id), TickOutcome::Running(1));
        assert_eq!(ctl.tick(&session_id), TickOutcome::Elapsed);

        assert_eq!(ctl.state().overall_status, OverallStatus::Failed);
        assert!(!ctl.state().is_timer_running());
        assert_eq!(
            ctl.capture_snapshot(Some(frame())).await.unwrap_err(),
            VerificationError::InvalidState(OverallStatus::Failed)
        );

        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            if let VerificationEvent::VerificationComplete { success, .. } = event {
                assert!(!success);
                completed = true;
            }
        }
        assert!(completed);
    }

    #[tokio::test]
    async fn timeout_cancels_capture_in_flight() {
        let mut ctl = controller_with(
            VerificationConfig {
                window_secs: 2,
                ..Default::default()
            },
            Arc::new(MockGateApi::compliant(worker(), 0.93)),
            Arc::new(MockAttendanceRecorder::new()),
        );
        let session_id = ctl.start_ml_only().unwrap();
        let CaptureStart::Dispatched(request) = ctl.begin_capture(Some(frame())).await.unwrap() else {
            panic!("capture not dispatched");
        };
        assert_eq!(
            ctl.state().items.get(VerificationItemType::Vest).ml_status,
            VerificationStatus::Checking
        );

        ctl.tick(&session_id);
        assert_eq!(ctl.tick(&session_id), TickOutcome::Elapsed);

        assert!(!ctl.is_capturing());
        assert_eq!(ctl.state().overall_status, OverallStatus::Failed);
        for item in ctl.state().items.iter() {
            assert_ne!(item.ml_status, VerificationStatus::Checking, "{:?}", item.item_type);
        }

        let outcome = ctl
            .complete_capture(request.ticket, Ok(compliant_response(worker(), 0.93)))
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Stale);
        assert_eq!(ctl.state().overall_status, OverallStatus::Failed);
    }

    fn count_gate_events(events: &mut broadcast::Receiver<VerificationEvent>) -> (usize, usize) {
        let (mut completes, mut opened) = (0, 0);
        while let Ok(event) = events.try_recv() {
            match event {
                VerificationEvent::VerificationComplete { .. } => completes += 1,
                VerificationEvent::GateOpened { .. } => opened += 1,
                _ => {}
            }
        }
        (completes, opened)
    }

    #[tokio::test]
    async fn flagged_admission_cannot_be_overridden() {
        let mut response = compliant_response(worker(), 0.95);
        for ppe in response.detections.ppe.iter_mut() {
            if ppe.label == "vest" {
                ppe.confidence = 0.4;
            }
        }
        let recorder = Arc::new(MockAttendanceRecorder::new());
        let mut ctl = controller_with(
            VerificationConfig {
                warning_allows_attendance: true,
                ..Default::default()
            },
            Arc::new(MockGateApi::returning(response)),
            recorder.clone(),
        );
        ctl.set_operator_role(OperatorRole::Manager);
        let mut events = ctl.subscribe();
        ctl.start_ml_only().unwrap();
        ctl.capture_snapshot(Some(frame())).await.unwrap();

        assert_eq!(ctl.state().overall_status, OverallStatus::Warning);
        assert!(ctl.state().attendance_marked);
        assert!(!ctl.can_override());

        let err = ctl
            .override_verdict("vest checked by hand", OperatorRole::Manager)
            .await
            .unwrap_err();
        assert_eq!(err, VerificationError::InvalidState(OverallStatus::Warning));
        assert_eq!(ctl.state().overall_status, OverallStatus::Warning);
        assert!(ctl.state().override_record.is_none());
        assert_eq!(recorder.call_count(), 1);
        assert_eq!(count_gate_events(&mut events), (1, 1));
    }

    #[tokio::test]
    async fn override_after_timeout_opens_gate_once() {
        let api = Arc::new(MockGateApi::returning(violation_response(
            &[VerificationItemType::Helmet],
            Some((worker(), 0.9)),
        )));
        let mut ctl = controller_with(
            VerificationConfig {
                window_secs: 1,
                ..Default::default()
            },
            api,
            Arc::new(MockAttendanceRecorder::new()),
        );
        let mut events = ctl.subscribe();
        let session_id = ctl.start_ml_only().unwrap();
        ctl.capture_snapshot(Some(frame())).await.unwrap();
        assert_eq!(ctl.tick(&session_id), TickOutcome::Elapsed);

        ctl.override_verdict("helmet in hand", OperatorRole::Manager)
            .await
            .unwrap();
        assert!(ctl
            .override_verdict("again", OperatorRole::Admin)
            .await
            .is_err());

        // One failed completion at timeout, one admitting completion after the override.
        assert_eq!(count_gate_events(&mut events), (2, 1));
    }

    #[tokio::test]
    async fn override_mirrors_backend_entry() {
        let api = Arc::new(MockGateApi::returning(violation_response(
            &[VerificationItemType::Vest],
            Some((worker(), 0.9)),
        )));
        let recorder = Arc::new(MockAttendanceRecorder::new());
        let mut ctl = controller_with(VerificationConfig::default(), api.clone(), recorder.clone());
        ctl.set_operator_role(OperatorRole::Manager);
        ctl.start_ml_only().unwrap();
        ctl.capture_snapshot(Some(frame())).await.unwrap();
        assert_eq!(ctl.state().overall_status, OverallStatus::Failed);
        assert!(ctl.can_override());

        let record = ctl
            .override_verdict("vest verified by hand", OperatorRole::Manager)
            .await
            .unwrap();

        assert_eq!(record.superseded_status, OverallStatus::Failed);
        assert_eq!(ctl.state().overall_status, OverallStatus::Passed);
        assert!(ctl.state().attendance_marked);
        assert!(!ctl.can_override());
        assert_eq!(api.override_calls().len(), 1);
        assert_eq!(api.override_calls()[0].1, "vest verified by hand");
        assert_eq!(recorder.records()[0].compliance, AttendanceCompliance::Overridden {
            reason: "vest verified by hand".into()
        });

        let session_id = ctl.state().session_id.clone().unwrap();
        assert_eq!(ctl.audit().overrides(&session_id).len(), 1);
    }

    #[tokio::test]
    async fn keyboard_scans_need_opt_in() {
        let mut ctl = controller(Arc::new(MockGateApi::compliant(worker(), 0.93)));
        ctl.start_rfid_only().unwrap();
        assert!(matches!(
            ctl.apply_key('H').await.unwrap_err(),
            VerificationError::InvalidInput(_)
        ));

        let mut demo = controller_with(
            VerificationConfig {
                keyboard_rfid: true,
                ..Default::default()
            },
            Arc::new(MockGateApi::compliant(worker(), 0.93)),
            Arc::new(MockAttendanceRecorder::new()),
        );
        demo.start_rfid_only().unwrap();
        assert!(demo.apply_key('h').await.unwrap());
        assert_eq!(
            demo.state().items.get(VerificationItemType::Helmet).rfid_status,
            VerificationStatus::Passed
        );
    }

    #[tokio::test]
    async fn attendance_retry_after_recorder_failure() {
        let recorder = Arc::new(MockAttendanceRecorder::failing());
        let mut ctl = controller_with(
            VerificationConfig::default(),
            Arc::new(MockGateApi::compliant(worker(), 0.93)),
            recorder.clone(),
        );
        ctl.start_ml_only().unwrap();
        ctl.capture_snapshot(Some(frame())).await.unwrap();

        assert_eq!(ctl.state().overall_status, OverallStatus::Passed);
        assert!(!ctl.state().attendance_marked);
        assert!(ctl
            .audit()
            .entries()
            .any(|e| matches!(e.event, AuditEvent::AttendanceFailed { .. })));

        assert!(!ctl.retry_attendance().await.unwrap());
        assert_eq!(recorder.call_count(), 2);
    }
}
