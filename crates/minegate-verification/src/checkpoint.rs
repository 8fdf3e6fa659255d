use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VerificationError;
use crate::types::{EvidenceChannel, SessionMode, VerificationItemType, VerificationStatus};

/// Evidence attached to a channel mark.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvidence {
    /// Tag id read by the RFID scanner
    RfidTag(String),
    /// Detection confidence from the vision model, in [0, 1]
    MlConfidence(f64),
}

/// Dual-channel status for one checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationItem {
    #[serde(rename = "type")]
    pub item_type: VerificationItemType,
    pub rfid_status: VerificationStatus,
    pub ml_status: VerificationStatus,
    pub rfid_tag_id: Option<String>,
    pub ml_confidence: Option<f64>,
}

impl VerificationItem {
    pub fn new(item_type: VerificationItemType) -> Self {
        Self {
            item_type,
            rfid_status: VerificationStatus::Pending,
            ml_status: VerificationStatus::Pending,
            rfid_tag_id: None,
            ml_confidence: None,
        }
    }

    pub fn channel_status(&self, channel: EvidenceChannel) -> VerificationStatus {
        match channel {
            EvidenceChannel::Rfid => self.rfid_status,
            EvidenceChannel::Ml => self.ml_status,
        }
    }

    /// Item-level status over the channels that apply in `mode`.
    ///
    /// Returns `None` when no channel applies (face in an RFID-only session).
    pub fn resolve(&self, mode: SessionMode) -> Option<VerificationStatus> {
        let statuses: Vec<VerificationStatus> = mode
            .channels_for(self.item_type)
            .into_iter()
            .map(|c| self.channel_status(c))
            .collect();
        resolve_channels(&statuses)
    }
}

/// Combine channel statuses: failed beats warning, passed needs every channel.
///
/// A partially passed item (one channel passed, the other still open) counts
/// as `checking`.
pub fn resolve_channels(statuses: &[VerificationStatus]) -> Option<VerificationStatus> {
    if statuses.is_empty() {
        return None;
    }
    if statuses.contains(&VerificationStatus::Failed) {
        return Some(VerificationStatus::Failed);
    }
    if statuses.iter().all(|s| *s == VerificationStatus::Passed) {
        return Some(VerificationStatus::Passed);
    }
    if statuses.contains(&VerificationStatus::Warning) {
        return Some(VerificationStatus::Warning);
    }
    if statuses.iter().any(|s| *s != VerificationStatus::Pending) {
        return Some(VerificationStatus::Checking);
    }
    Some(VerificationStatus::Pending)
}

/// The four checkpoints of a session. Every item is always present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBoard {
    items: [VerificationItem; 4],
}

impl CheckpointBoard {
    pub fn new() -> Self {
        Self {
            items: VerificationItemType::ALL.map(VerificationItem::new),
        }
    }

    fn index(item: VerificationItemType) -> usize {
        match item {
            VerificationItemType::Helmet => 0,
            VerificationItemType::Vest => 1,
            VerificationItemType::Shoes => 2,
            VerificationItemType::Face => 3,
        }
    }

    pub fn get(&self, item: VerificationItemType) -> &VerificationItem {
        &self.items[Self::index(item)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &VerificationItem> {
        self.items.iter()
    }

    /// Set one channel of one checkpoint.
    ///
    /// `(face, rfid)` is always rejected and leaves the board untouched.
    pub fn mark_channel(
        &mut self,
        item: VerificationItemType,
        channel: EvidenceChannel,
        status: VerificationStatus,
        evidence: Option<ChannelEvidence>,
    ) -> Result<(), VerificationError> {
        if channel == EvidenceChannel::Rfid && !item.has_rfid() {
            return Err(VerificationError::InvalidInput(format!(
                "{} has no rfid channel",
                item
            )));
        }

        match (&channel, &evidence) {
            (EvidenceChannel::Rfid, Some(ChannelEvidence::MlConfidence(_)))
            | (EvidenceChannel::Ml, Some(ChannelEvidence::RfidTag(_))) => {
                return Err(VerificationError::InvalidInput(format!(
                    "evidence does not match {} channel",
                    channel
                )));
            }
            (_, Some(ChannelEvidence::MlConfidence(c))) if !(0.0..=1.0).contains(c) => {
                return Err(VerificationError::InvalidInput(format!(
                    "confidence {} outside [0, 1]",
                    c
                )));
            }
            _ => {}
        }

        let entry = &mut self.items[Self::index(item)];
        match channel {
            EvidenceChannel::Rfid => {
                entry.rfid_status = status;
                if let Some(ChannelEvidence::RfidTag(tag)) = evidence {
                    entry.rfid_tag_id = Some(tag);
                }
            }
            EvidenceChannel::Ml => {
                entry.ml_status = status;
                if let Some(ChannelEvidence::MlConfidence(c)) = evidence {
                    entry.ml_confidence = Some(c);
                }
            }
        }

        debug!(item = %item, channel = %channel, status = ?status, "Channel marked");
        Ok(())
    }

    /// Move every unresolved applicable channel to `checking`.
    pub fn begin_sampling(&mut self, channel: EvidenceChannel, mode: SessionMode) {
        for entry in self.items.iter_mut() {
            if !mode.channels_for(entry.item_type).contains(&channel) {
                continue;
            }
            let status = match channel {
                EvidenceChannel::Rfid => &mut entry.rfid_status,
                EvidenceChannel::Ml => &mut entry.ml_status,
            };
            if !status.is_resolved() {
                *status = VerificationStatus::Checking;
            }
        }
    }

    /// Return `channel` samples still in `checking` to `pending`.
    pub fn cancel_sampling(&mut self, channel: EvidenceChannel) {
        for entry in self.items.iter_mut() {
            let status = match channel {
                EvidenceChannel::Rfid => &mut entry.rfid_status,
                EvidenceChannel::Ml => &mut entry.ml_status,
            };
            if *status == VerificationStatus::Checking {
                *status = VerificationStatus::Pending;
            }
        }
    }

    /// Items that have at least one applicable channel, with their resolved status.
    pub fn resolved(&self, mode: SessionMode) -> Vec<(VerificationItemType, VerificationStatus)> {
        self.items
            .iter()
            .filter_map(|i| i.resolve(mode).map(|s| (i.item_type, s)))
            .collect()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for CheckpointBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use VerificationStatus::*;

    #[test]
    fn new_board_is_all_pending() {
        let board = CheckpointBoard::new();
        assert_eq!(board.iter().count(), 4);
        for item in board.iter() {
            assert_eq!(item.rfid_status, Pending);
            assert_eq!(item.ml_status, Pending);
        }
    }

    #[test]
    fn face_rfid_mark_is_rejected() {
        let mut board = CheckpointBoard::new();
        let result = board.mark_channel(
            VerificationItemType::Face,
            EvidenceChannel::Rfid,
            Passed,
            Some(ChannelEvidence::RfidTag("T-1".into())),
        );
        assert!(matches!(result, Err(VerificationError::InvalidInput(_))));
        assert_eq!(board.get(VerificationItemType::Face).rfid_status, Pending);
        assert!(board.get(VerificationItemType::Face).rfid_tag_id.is_none());
    }

    #[test]
    fn mark_records_evidence() {
        let mut board = CheckpointBoard::new();
        board
            .mark_channel(
                VerificationItemType::Helmet,
                EvidenceChannel::Rfid,
                Passed,
                Some(ChannelEvidence::RfidTag("HLM-7".into())),
            )
            .unwrap();
        board
            .mark_channel(
                VerificationItemType::Face,
                EvidenceChannel::Ml,
                Warning,
                Some(ChannelEvidence::MlConfidence(0.5)),
            )
            .unwrap();

        assert_eq!(
            board.get(VerificationItemType::Helmet).rfid_tag_id.as_deref(),
            Some("HLM-7")
        );
        assert_eq!(board.get(VerificationItemType::Face).ml_confidence, Some(0.5));
    }

    #[test]
    fn mismatched_evidence_is_rejected() {
        let mut board = CheckpointBoard::new();
        let result = board.mark_channel(
            VerificationItemType::Vest,
            EvidenceChannel::Ml,
            Passed,
            Some(ChannelEvidence::RfidTag("V-1".into())),
        );
        assert!(result.is_err());

        let result = board.mark_channel(
            VerificationItemType::Vest,
            EvidenceChannel::Ml,
            Passed,
            Some(ChannelEvidence::MlConfidence(1.4)),
        );
        assert!(result.is_err());
        assert_eq!(board.get(VerificationItemType::Vest).ml_status, Pending);
    }

    #[test]
    fn resolution_rules() {
        assert_eq!(resolve_channels(&[]), None);
        assert_eq!(resolve_channels(&[Passed, Passed]), Some(Passed));
        assert_eq!(resolve_channels(&[Passed, Failed]), Some(Failed));
        assert_eq!(resolve_channels(&[Warning, Failed]), Some(Failed));
        assert_eq!(resolve_channels(&[Warning, Passed]), Some(Warning));
        assert_eq!(resolve_channels(&[Passed, Pending]), Some(Checking));
        assert_eq!(resolve_channels(&[Checking, Pending]), Some(Checking));
        assert_eq!(resolve_channels(&[Pending, Pending]), Some(Pending));
    }

    #[test]
    fn resolution_respects_mode() {
        let mut board = CheckpointBoard::new();
        board
            .mark_channel(VerificationItemType::Shoes, EvidenceChannel::Ml, Passed, None)
            .unwrap();

        let shoes = board.get(VerificationItemType::Shoes);
        assert_eq!(shoes.resolve(SessionMode::MlOnly), Some(Passed));
        assert_eq!(shoes.resolve(SessionMode::Full), Some(Checking));
        assert_eq!(shoes.resolve(SessionMode::RfidOnly), Some(Pending));
        assert_eq!(
            board.get(VerificationItemType::Face).resolve(SessionMode::RfidOnly),
            None
        );
    }

    #[test]
    fn begin_sampling_skips_resolved_channels() {
        let mut board = CheckpointBoard::new();
        board
            .mark_channel(VerificationItemType::Helmet, EvidenceChannel::Ml, Passed, None)
            .unwrap();
        board.begin_sampling(EvidenceChannel::Ml, SessionMode::Full);

        assert_eq!(board.get(VerificationItemType::Helmet).ml_status, Passed);
        assert_eq!(board.get(VerificationItemType::Vest).ml_status, Checking);
        assert_eq!(board.get(VerificationItemType::Face).ml_status, Checking);

        board.begin_sampling(EvidenceChannel::Rfid, SessionMode::Full);
        assert_eq!(board.get(VerificationItemType::Face).rfid_status, Pending);
        assert_eq!(board.get(VerificationItemType::Shoes).rfid_status, Checking);
    }

    #[test]
    fn cancel_sampling_keeps_resolved_channels() {
        let mut board = CheckpointBoard::new();
        board
            .mark_channel(VerificationItemType::Vest, EvidenceChannel::Ml, Failed, None)
            .unwrap();
        board.begin_sampling(EvidenceChannel::Ml, SessionMode::Full);
        board.begin_sampling(EvidenceChannel::Rfid, SessionMode::Full);
        board.cancel_sampling(EvidenceChannel::Ml);

        assert_eq!(board.get(VerificationItemType::Vest).ml_status, Failed);
        assert_eq!(board.get(VerificationItemType::Helmet).ml_status, Pending);
        assert_eq!(board.get(VerificationItemType::Face).ml_status, Pending);
        assert_eq!(board.get(VerificationItemType::Helmet).rfid_status, Checking);
    }
}
