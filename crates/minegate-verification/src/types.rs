use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VerificationError;

/// One of the four tracked checkpoints at a gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationItemType {
    Helmet,
    Vest,
    Shoes,
    Face,
}

impl VerificationItemType {
    /// All checkpoints in display order.
    pub const ALL: [VerificationItemType; 4] = [
        VerificationItemType::Helmet,
        VerificationItemType::Vest,
        VerificationItemType::Shoes,
        VerificationItemType::Face,
    ];

    /// PPE checkpoints carried as tagged equipment.
    pub const PPE: [VerificationItemType; 3] = [
        VerificationItemType::Helmet,
        VerificationItemType::Vest,
        VerificationItemType::Shoes,
    ];

    /// Whether this checkpoint can be evidenced by an RFID tag.
    pub fn has_rfid(&self) -> bool {
        !matches!(self, VerificationItemType::Face)
    }

    /// Map a PPE label used by scanners and detectors onto a checkpoint.
    ///
    /// Accepts the common aliases (`hardhat`, `safety_vest`, `boots`, ...).
    /// Never yields `Face`.
    pub fn from_ppe_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "helmet" | "hardhat" | "hard_hat" | "safety_helmet" => Some(VerificationItemType::Helmet),
            "vest" | "safety_vest" | "hi_vis" | "hivis" | "reflective_vest" => {
                Some(VerificationItemType::Vest)
            }
            "shoes" | "boots" | "safety_shoes" | "safety_boots" | "footwear" => {
                Some(VerificationItemType::Shoes)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationItemType::Helmet => "helmet",
            VerificationItemType::Vest => "vest",
            VerificationItemType::Shoes => "shoes",
            VerificationItemType::Face => "face",
        }
    }
}

impl fmt::Display for VerificationItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationItemType {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "helmet" => Ok(VerificationItemType::Helmet),
            "vest" => Ok(VerificationItemType::Vest),
            "shoes" => Ok(VerificationItemType::Shoes),
            "face" => Ok(VerificationItemType::Face),
            other => Err(VerificationError::InvalidInput(format!(
                "unknown checkpoint: {}",
                other
            ))),
        }
    }
}

/// Evidence source for a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceChannel {
    Rfid,
    Ml,
}

impl fmt::Display for EvidenceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceChannel::Rfid => f.write_str("rfid"),
            EvidenceChannel::Ml => f.write_str("ml"),
        }
    }
}

/// Status of one evidence channel, or of a resolved checkpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Checking,
    Passed,
    Failed,
    Warning,
}

impl VerificationStatus {
    /// Passed, failed and warning are resolved outcomes.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Passed | VerificationStatus::Failed | VerificationStatus::Warning
        )
    }
}

/// Aggregate status of a verification session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Idle,
    Verifying,
    Passed,
    Failed,
    Warning,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallStatus::Idle => "idle",
            OverallStatus::Verifying => "verifying",
            OverallStatus::Passed => "passed",
            OverallStatus::Failed => "failed",
            OverallStatus::Warning => "warning",
        };
        f.write_str(s)
    }
}

/// Which evidence channels a session accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// RFID and vision evidence together
    #[default]
    Full,
    /// RFID only (diagnostic flow)
    RfidOnly,
    /// Vision only (diagnostic flow)
    MlOnly,
}

impl SessionMode {
    pub fn accepts(&self, channel: EvidenceChannel) -> bool {
        match (self, channel) {
            (SessionMode::Full, _) => true,
            (SessionMode::RfidOnly, EvidenceChannel::Rfid) => true,
            (SessionMode::MlOnly, EvidenceChannel::Ml) => true,
            _ => false,
        }
    }

    /// Channels that apply to `item` in this mode.
    pub fn channels_for(&self, item: VerificationItemType) -> Vec<EvidenceChannel> {
        let mut channels = Vec::with_capacity(2);
        if item.has_rfid() && self.accepts(EvidenceChannel::Rfid) {
            channels.push(EvidenceChannel::Rfid);
        }
        if self.accepts(EvidenceChannel::Ml) {
            channels.push(EvidenceChannel::Ml);
        }
        channels
    }

    /// Face identification is only possible with the vision channel.
    pub fn requires_identification(&self) -> bool {
        self.accepts(EvidenceChannel::Ml)
    }
}

/// Operator roles, ordered by authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    Worker,
    ShiftIncharge,
    SafetyOfficer,
    Manager,
    GeneralManager,
    Admin,
}

impl fmt::Display for OperatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatorRole::Worker => "worker",
            OperatorRole::ShiftIncharge => "shift_incharge",
            OperatorRole::SafetyOfficer => "safety_officer",
            OperatorRole::Manager => "manager",
            OperatorRole::GeneralManager => "general_manager",
            OperatorRole::Admin => "admin",
        };
        f.write_str(s)
    }
}

impl FromStr for OperatorRole {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "worker" => Ok(OperatorRole::Worker),
            "shift_incharge" => Ok(OperatorRole::ShiftIncharge),
            "safety_officer" => Ok(OperatorRole::SafetyOfficer),
            "manager" => Ok(OperatorRole::Manager),
            "general_manager" => Ok(OperatorRole::GeneralManager),
            "admin" => Ok(OperatorRole::Admin),
            other => Err(VerificationError::InvalidInput(format!(
                "unknown role: {}",
                other
            ))),
        }
    }
}

/// Session identifier (UUID v4).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GateId(pub String);

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MineId(pub String);

impl fmt::Display for MineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// RFID tags registered to a worker's issued PPE.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpeRegistration {
    pub helmet_tag: Option<String>,
    pub vest_tag: Option<String>,
    pub shoes_tag: Option<String>,
}

impl PpeRegistration {
    pub fn tag_for(&self, item: VerificationItemType) -> Option<&str> {
        match item {
            VerificationItemType::Helmet => self.helmet_tag.as_deref(),
            VerificationItemType::Vest => self.vest_tag.as_deref(),
            VerificationItemType::Shoes => self.shoes_tag.as_deref(),
            VerificationItemType::Face => None,
        }
    }
}

/// A worker as known to the Worker/Employee backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub ppe: PpeRegistration,
}

impl Worker {
    pub fn new(employee_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            employee_id: employee_id.into(),
            name: name.into(),
            department: None,
            ppe: PpeRegistration::default(),
        }
    }

    pub fn with_ppe(mut self, ppe: PpeRegistration) -> Self {
        self.ppe = ppe;
        self
    }
}

/// A camera frame as delivered by the frame source (base64 data URL).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub data_url: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl Frame {
    pub fn new(data_url: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
            captured_at: chrono::Utc::now(),
        }
    }
}
