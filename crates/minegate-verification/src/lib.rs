//! Mine Gate Verification: bounded PPE and identity checks at a mine entry gate.
//!
//! A worker approaching the gate is verified on four checkpoints (helmet,
//! vest, shoes, face) through two independent evidence channels: RFID tag
//! reads and vision detection. The session is bounded by a countdown window;
//! a passing verdict marks attendance once and opens the gate, a failing one
//! can be bypassed by a sufficiently senior operator with a recorded reason.
//!
//! ## Session Guarantees
//!
//! - **Face has no RFID channel**: marking it is rejected and leaves the board unchanged.
//! - **Single session per gate**: starting while a window is open is a conflict.
//! - **Stale evidence is dropped**: detections are matched to the session that issued them.
//! - **Sticky identity**: the first confident face match wins for the session.
//! - **Attendance at most once**: only for an identified worker with an admitting verdict.
//! - **Append-only audit**: every override is kept distinct from automatic verdicts.
//!
//! ## Layers
//!
//! 1. **Checkpoint board**: per-item, per-channel statuses
//! 2. **Verdict aggregation**: items to overall status
//! 3. **Session controller**: orchestration, timer, attendance, override
//! 4. **Session runtime**: actor task driving the controller from commands and ticks

pub mod attendance;
pub mod audit;
pub mod authority;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod detection;
pub mod error;
pub mod mocks;
pub mod rfid;
pub mod runtime;
pub mod state;
pub mod timer;
pub mod traits;
pub mod types;
pub mod verdict;

pub use attendance::{AttendanceCommitter, AttendanceCompliance, AttendanceRecord};
pub use audit::{AuditEntry, AuditEvent, AuditTrail};
pub use authority::{OverrideAuthority, OverrideRecord};
pub use checkpoint::{ChannelEvidence, CheckpointBoard, VerificationItem};
pub use config::{LoggingConfig, VerificationConfig};
pub use controller::{
    CaptureOutcome, CaptureRequest, CaptureStart, CaptureTicket, GateVerificationController,
    VerificationEvent,
};
pub use detection::{DetectionInterpreter, DetectionMode, DetectionResponse};
pub use error::{VerificationError, VerificationResult};
pub use mocks::{MockAttendanceRecorder, MockGateApi};
pub use rfid::RfidScan;
pub use runtime::{SessionHandle, SessionRuntime, SessionSnapshot};
pub use state::GateVerificationState;
pub use timer::{SessionTimer, TickOutcome};
pub use traits::{AttendanceRecorder, GateApi};
pub use types::{
    EvidenceChannel, Frame, GateId, MineId, OperatorRole, OverallStatus, PpeRegistration,
    SessionId, SessionMode, VerificationItemType, VerificationStatus, Worker,
};
pub use verdict::{Verdict, VerdictAggregator};
