use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointBoard;
use crate::types::{OverallStatus, SessionMode, VerificationItemType, VerificationStatus};

/// Aggregated view of a session's checkpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub overall: OverallStatus,
    /// Checkpoints resolved `passed`
    pub passed_count: usize,
    /// Checkpoints with at least one applicable channel
    pub total_checks: usize,
    /// Checkpoints resolved `warning`
    pub warnings: Vec<VerificationItemType>,
    /// Checkpoints resolved `failed`
    pub failures: Vec<VerificationItemType>,
}

impl Verdict {
    pub fn idle() -> Self {
        Self {
            overall: OverallStatus::Idle,
            passed_count: 0,
            total_checks: 0,
            warnings: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Combines checkpoint states into an overall verdict.
///
/// Checks are counted per item, not per channel.
pub struct VerdictAggregator;

impl VerdictAggregator {
    /// Aggregate a live session.
    ///
    /// `identified` reports whether a worker has been matched; it gates
    /// `passed` only in modes that carry the vision channel.
    pub fn aggregate(board: &CheckpointBoard, mode: SessionMode, identified: bool) -> Verdict {
        let resolved = board.resolved(mode);

        let mut passed_count = 0;
        let mut warnings = Vec::new();
        let mut failures = Vec::new();
        for (item, status) in &resolved {
            match status {
                VerificationStatus::Passed => passed_count += 1,
                VerificationStatus::Warning => warnings.push(*item),
                VerificationStatus::Failed => failures.push(*item),
                _ => {}
            }
        }
        let total_checks = resolved.len();

        let identification_ok = identified || !mode.requires_identification();
        let overall = if !failures.is_empty() {
            OverallStatus::Failed
        } else if total_checks > 0 && passed_count == total_checks && identification_ok {
            OverallStatus::Passed
        } else if !warnings.is_empty() {
            OverallStatus::Warning
        } else {
            OverallStatus::Verifying
        };

        Verdict {
            overall,
            passed_count,
            total_checks,
            warnings,
            failures,
        }
    }
}
