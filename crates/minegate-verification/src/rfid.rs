use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VerificationError;
use crate::types::VerificationItemType;

/// A tag read reported by the gate's RFID scanner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfidScan {
    pub tag_id: String,
    pub tag_type: String,
    pub timestamp: DateTime<Utc>,
}

impl RfidScan {
    pub fn new(tag_id: impl Into<String>, tag_type: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.into(),
            tag_type: tag_type.into(),
            timestamp: Utc::now(),
        }
    }

    /// Checkpoint evidenced by this tag.
    pub fn item(&self) -> Result<VerificationItemType, VerificationError> {
        if self.tag_id.trim().is_empty() {
            return Err(VerificationError::InvalidInput("empty rfid tag id".into()));
        }
        VerificationItemType::from_ppe_label(&self.tag_type).ok_or_else(|| {
            VerificationError::InvalidInput(format!("unsupported rfid tag type: {}", self.tag_type))
        })
    }

    /// Keyboard-simulated scan for demo mode: `H`, `V`, `S`.
    pub fn from_key(key: char) -> Option<Self> {
        let item = match key.to_ascii_lowercase() {
            'h' => VerificationItemType::Helmet,
            'v' => VerificationItemType::Vest,
            's' => VerificationItemType::Shoes,
            _ => return None,
        };
        Some(Self::new(format!("SIM-{}", item.as_str().to_ascii_uppercase()), item.as_str()))
    }
}
