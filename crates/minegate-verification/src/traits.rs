use async_trait::async_trait;

use crate::attendance::AttendanceRecord;
use crate::detection::{DetectionMode, DetectionResponse};
use crate::error::VerificationError;
use crate::types::{Frame, GateId};

/// Gate/Worker backend used by verification sessions.
#[async_trait]
pub trait GateApi: Send + Sync {
    /// Run PPE and face detection on a frame captured at `gate_id`.
    ///
    /// Transport failures should be reported as
    /// [`VerificationError::DetectionUnavailable`].
    async fn detect(
        &self,
        gate_id: &GateId,
        frame: &Frame,
        mode: DetectionMode,
    ) -> Result<DetectionResponse, VerificationError>;

    /// Mirror a manual override onto the backend entry.
    async fn override_entry(&self, entry_id: &str, reason: &str) -> Result<(), VerificationError>;
}

/// Destination of attendance records.
#[async_trait]
pub trait AttendanceRecorder: Send + Sync {
    async fn record_attendance(&self, record: &AttendanceRecord) -> Result<(), VerificationError>;
}
