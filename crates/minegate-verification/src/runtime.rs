//! Session runtime
//!
//! Runs a [`GateVerificationController`] on its own task. Commands arrive on
//! an mpsc inbox, the countdown is driven by a tokio interval, and detections
//! run on spawned tasks whose results are posted back to the inbox tagged with
//! the session they were issued for.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::audit::AuditEntry;
use crate::authority::OverrideRecord;
use crate::controller::{
    CaptureOutcome, CaptureStart, CaptureTicket, GateVerificationController, VerificationEvent,
};
use crate::detection::DetectionResponse;
use crate::error::{VerificationError, VerificationResult};
use crate::rfid::RfidScan;
use crate::state::GateVerificationState;
use crate::types::{
    Frame, GateId, MineId, OperatorRole, SessionId, SessionMode, VerificationItemType,
};
use crate::verdict::Verdict;

const INBOX_CAPACITY: usize = 64;

/// Point-in-time view of a session for the UI.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub state: GateVerificationState,
    pub verdict: Verdict,
    pub can_override: bool,
}

enum Command {
    Start {
        mode: SessionMode,
        reply: oneshot::Sender<VerificationResult<SessionId>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    SelectGate {
        mine_id: MineId,
        gate_id: GateId,
        reply: oneshot::Sender<()>,
    },
    PushFrame(Frame),
    RfidScan {
        scan: RfidScan,
        reply: oneshot::Sender<VerificationResult<bool>>,
    },
    Key {
        key: char,
        reply: oneshot::Sender<VerificationResult<bool>>,
    },
    RfidFault {
        item: VerificationItemType,
        reason: String,
        reply: oneshot::Sender<VerificationResult<()>>,
    },
    Capture {
        frame: Option<Frame>,
        reply: oneshot::Sender<VerificationResult<CaptureOutcome>>,
    },
    CaptureFinished {
        ticket: CaptureTicket,
        result: Result<DetectionResponse, VerificationError>,
        reply: oneshot::Sender<VerificationResult<CaptureOutcome>>,
    },
    Override {
        reason: String,
        role: OperatorRole,
        reply: oneshot::Sender<VerificationResult<OverrideRecord>>,
    },
    RetryAttendance {
        reply: oneshot::Sender<VerificationResult<bool>>,
    },
    SetOperator(OperatorRole),
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Audit {
        reply: oneshot::Sender<Vec<AuditEntry>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<VerificationEvent>,
}

pub struct SessionRuntime;

impl SessionRuntime {
    /// Move `controller` onto a background task.
    pub fn spawn(controller: GateVerificationController) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let event_tx = controller.event_sender();
        let inbox = tx.downgrade();

        let task = tokio::spawn(run(controller, rx, inbox));

        (SessionHandle { tx, event_tx }, task)
    }
}

async fn run(
    mut controller: GateVerificationController,
    mut rx: mpsc::Receiver<Command>,
    inbox: mpsc::WeakSender<Command>,
) {
    let period = Duration::from_millis(controller.config().tick_interval_ms.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        gate_id = %controller.state().selected_gate_id,
        tick_ms = period.as_millis() as u64,
        "Session runtime started"
    );

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    controller.reset_verification();
                    break;
                };
                match cmd {
                    Command::Shutdown { reply } => {
                        controller.reset_verification();
                        let _ = reply.send(());
                        break;
                    }
                    Command::Start { mode, reply } => {
                        let result = match mode {
                            SessionMode::Full => controller.start_verification(),
                            SessionMode::RfidOnly => controller.start_rfid_only(),
                            SessionMode::MlOnly => controller.start_ml_only(),
                        };
                        if result.is_ok() {
                            // A fresh window gets a full first second.
                            ticker.reset();
                        }
                        let _ = reply.send(result);
                    }
                    cmd => handle(&mut controller, cmd, &inbox).await,
                }
            }
            _ = ticker.tick() => {
                if let Some(session_id) = controller.state().session_id.clone() {
                    if controller.state().is_timer_running() {
                        controller.tick(&session_id);
                    }
                }
            }
        }
    }

    tracing::info!("Session runtime stopped");
}

async fn handle(
    controller: &mut GateVerificationController,
    cmd: Command,
    inbox: &mpsc::WeakSender<Command>,
) {
    match cmd {
        Command::Reset { reply } => {
            controller.reset_verification();
            let _ = reply.send(());
        }
        Command::SelectGate {
            mine_id,
            gate_id,
            reply,
        } => {
            controller.select_gate(mine_id, gate_id);
            let _ = reply.send(());
        }
        Command::PushFrame(frame) => controller.push_frame(frame),
        Command::RfidScan { scan, reply } => {
            let _ = reply.send(controller.apply_rfid_scan(scan).await);
        }
        Command::Key { key, reply } => {
            let _ = reply.send(controller.apply_key(key).await);
        }
        Command::RfidFault { item, reason, reply } => {
            let _ = reply.send(controller.report_rfid_fault(item, &reason).await);
        }
        Command::Capture { frame, reply } => match controller.begin_capture(frame).await {
            Ok(CaptureStart::Dispatched(request)) => {
                let Some(inbox) = inbox.upgrade() else {
                    let _ = reply.send(Err(VerificationError::RuntimeClosed));
                    return;
                };
                let api = controller.gate_api();
                tokio::spawn(async move {
                    let result = api
                        .detect(&request.gate_id, &request.frame, request.mode)
                        .await;
                    let finished = Command::CaptureFinished {
                        ticket: request.ticket,
                        result,
                        reply,
                    };
                    if inbox.send(finished).await.is_err() {
                        tracing::debug!("Runtime closed before detection finished");
                    }
                });
            }
            Ok(CaptureStart::Unavailable(reason)) => {
                let _ = reply.send(Ok(CaptureOutcome::Unavailable(reason)));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        },
        Command::CaptureFinished {
            ticket,
            result,
            reply,
        } => {
            let _ = reply.send(controller.complete_capture(ticket, result).await);
        }
        Command::Override {
            reason,
            role,
            reply,
        } => {
            let _ = reply.send(controller.override_verdict(&reason, role).await);
        }
        Command::RetryAttendance { reply } => {
            let _ = reply.send(controller.retry_attendance().await);
        }
        Command::SetOperator(role) => controller.set_operator_role(role),
        Command::Snapshot { reply } => {
            let _ = reply.send(SessionSnapshot {
                state: controller.state().clone(),
                verdict: controller.verdict(),
                can_override: controller.can_override(),
            });
        }
        Command::Audit { reply } => {
            let _ = reply.send(controller.audit().entries().cloned().collect());
        }
        Command::Start { .. } | Command::Shutdown { .. } => {}
    }
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<VerificationEvent> {
        self.event_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> VerificationResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| VerificationError::RuntimeClosed)?;
        rx.await.map_err(|_| VerificationError::RuntimeClosed)
    }

    pub async fn start_verification(&self) -> VerificationResult<SessionId> {
        self.start(SessionMode::Full).await
    }

    pub async fn start_rfid_only(&self) -> VerificationResult<SessionId> {
        self.start(SessionMode::RfidOnly).await
    }

    pub async fn start_ml_only(&self) -> VerificationResult<SessionId> {
        self.start(SessionMode::MlOnly).await
    }

    async fn start(&self, mode: SessionMode) -> VerificationResult<SessionId> {
        self.request(|reply| Command::Start { mode, reply }).await?
    }

    pub async fn reset_verification(&self) -> VerificationResult<()> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub async fn select_gate(&self, mine_id: MineId, gate_id: GateId) -> VerificationResult<()> {
        self.request(|reply| Command::SelectGate {
            mine_id,
            gate_id,
            reply,
        })
        .await
    }

    pub async fn push_frame(&self, frame: Frame) -> VerificationResult<()> {
        self.tx
            .send(Command::PushFrame(frame))
            .await
            .map_err(|_| VerificationError::RuntimeClosed)
    }

    pub async fn apply_rfid_scan(&self, scan: RfidScan) -> VerificationResult<bool> {
        self.request(|reply| Command::RfidScan { scan, reply }).await?
    }

    pub async fn apply_key(&self, key: char) -> VerificationResult<bool> {
        self.request(|reply| Command::Key { key, reply }).await?
    }

    pub async fn report_rfid_fault(
        &self,
        item: VerificationItemType,
        reason: impl Into<String>,
    ) -> VerificationResult<()> {
        let reason = reason.into();
        self.request(|reply| Command::RfidFault { item, reason, reply })
            .await?
    }

    /// Capture and detect. Resolves once the detection has been applied or dropped.
    pub async fn capture_snapshot(&self, frame: Option<Frame>) -> VerificationResult<CaptureOutcome> {
        self.request(|reply| Command::Capture { frame, reply }).await?
    }

    pub async fn override_verdict(
        &self,
        reason: impl Into<String>,
        role: OperatorRole,
    ) -> VerificationResult<OverrideRecord> {
        let reason = reason.into();
        self.request(|reply| Command::Override {
            reason,
            role,
            reply,
        })
        .await?
    }

    pub async fn retry_attendance(&self) -> VerificationResult<bool> {
        self.request(|reply| Command::RetryAttendance { reply }).await?
    }

    pub async fn set_operator_role(&self, role: OperatorRole) -> VerificationResult<()> {
        self.tx
            .send(Command::SetOperator(role))
            .await
            .map_err(|_| VerificationError::RuntimeClosed)
    }

    pub async fn snapshot(&self) -> VerificationResult<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn audit(&self) -> VerificationResult<Vec<AuditEntry>> {
        self.request(|reply| Command::Audit { reply }).await
    }

    /// Reset any open session and stop the runtime.
    pub async fn shutdown(&self) -> VerificationResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
