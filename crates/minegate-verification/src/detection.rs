//! Gate API detection payloads and their mapping onto checkpoint statuses.

use serde::{Deserialize, Serialize};

use crate::error::VerificationError;
use crate::types::{VerificationItemType, VerificationStatus, Worker};

/// Direction of passage sent with a detection request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    #[default]
    Entry,
    Exit,
}

/// Response of `detect(gateId, image, mode)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub success: bool,
    #[serde(default)]
    pub entry: Option<GateEntry>,
    #[serde(default)]
    pub violations: Vec<String>,
    /// Annotated frame, if the backend returns one
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub detections: Detections,
}

impl DetectionResponse {
    /// Decode a Gate API response body. Malformed bodies count as an unavailable backend.
    pub fn from_json(body: &[u8]) -> Result<Self, VerificationError> {
        serde_json::from_slice(body).map_err(|e| {
            VerificationError::DetectionUnavailable(format!("malformed detection response: {}", e))
        })
    }
}

/// Backend gate-entry record created for a detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateEntry {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detections {
    #[serde(default)]
    pub ppe: Vec<PpeDetection>,
    #[serde(default)]
    pub faces: Vec<FaceMatch>,
    #[serde(default)]
    pub violations: Vec<ViolationDetection>,
    #[serde(default)]
    pub summary: DetectionSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PpeDetection {
    pub label: String,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    /// Matched worker, `None` for an unknown face
    #[serde(default)]
    pub worker: Option<Worker>,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationDetection {
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    #[serde(default)]
    pub compliant: bool,
    #[serde(default)]
    pub ppe_count: usize,
    #[serde(default)]
    pub face_count: usize,
    #[serde(default)]
    pub violation_count: usize,
}

/// ML status for one checkpoint derived from a detection.
#[derive(Clone, Debug, PartialEq)]
pub struct MlMark {
    pub item: VerificationItemType,
    pub status: VerificationStatus,
    pub confidence: Option<f64>,
}

/// A face match strong enough to identify the worker.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityCandidate {
    pub worker: Worker,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Interpretation {
    pub marks: Vec<MlMark>,
    pub candidate: Option<IdentityCandidate>,
    pub entry_id: Option<String>,
}

/// Turns detection responses into per-checkpoint ML statuses.
#[derive(Clone, Debug)]
pub struct DetectionInterpreter {
    pub pass_confidence: f64,
    pub warning_confidence: f64,
    pub identification_threshold: f64,
}

/// Label of an absence class such as `NO-Hardhat` or `no_vest`.
fn absence_label(label: &str) -> Option<VerificationItemType> {
    let lower = label.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("no-")
        .or_else(|| lower.strip_prefix("no_"))
        .or_else(|| lower.strip_prefix("no "))
        .or_else(|| lower.strip_prefix("missing_"))?;
    VerificationItemType::from_ppe_label(rest)
}

/// Violations name the missing item either bare or with an absence prefix.
fn violation_item(label: &str) -> Option<VerificationItemType> {
    absence_label(label).or_else(|| VerificationItemType::from_ppe_label(label))
}

impl DetectionInterpreter {
    pub fn interpret(&self, response: &DetectionResponse) -> Interpretation {
        let mut marks = Vec::with_capacity(4);

        for item in VerificationItemType::PPE {
            marks.push(self.interpret_ppe(item, response));
        }

        let (face_mark, candidate) = self.interpret_face(&response.detections.faces);
        marks.push(face_mark);

        Interpretation {
            marks,
            candidate,
            entry_id: response.entry.as_ref().map(|e| e.id.clone()),
        }
    }

    fn interpret_ppe(&self, item: VerificationItemType, response: &DetectionResponse) -> MlMark {
        let detections = &response.detections;

        let violation = detections
            .violations
            .iter()
            .find(|v| violation_item(&v.label) == Some(item))
            .map(|v| v.confidence)
            .or_else(|| {
                response
                    .violations
                    .iter()
                    .chain(detections.ppe.iter().map(|p| &p.label).filter(|l| absence_label(l).is_some()))
                    .find(|l| violation_item(l) == Some(item))
                    .map(|_| None)
            });
        if let Some(confidence) = violation {
            return MlMark {
                item,
                status: VerificationStatus::Failed,
                confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
            };
        }

        let best = detections
            .ppe
            .iter()
            .filter(|p| absence_label(&p.label).is_none())
            .filter(|p| VerificationItemType::from_ppe_label(&p.label) == Some(item))
            .map(|p| p.confidence.clamp(0.0, 1.0))
            .max_by(|a, b| a.total_cmp(b));

        let status = match best {
            Some(c) if c >= self.pass_confidence => VerificationStatus::Passed,
            Some(c) if c >= self.warning_confidence => VerificationStatus::Warning,
            _ => VerificationStatus::Failed,
        };
        MlMark {
            item,
            status,
            confidence: best,
        }
    }

    fn interpret_face(&self, faces: &[FaceMatch]) -> (MlMark, Option<IdentityCandidate>) {
        let item = VerificationItemType::Face;

        let best_match = faces
            .iter()
            .filter(|f| f.worker.is_some())
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        if let Some(face) = best_match {
            let confidence = face.confidence.clamp(0.0, 1.0);
            if confidence >= self.identification_threshold {
                let candidate = face.worker.clone().map(|worker| IdentityCandidate {
                    worker,
                    confidence,
                });
                return (
                    MlMark {
                        item,
                        status: VerificationStatus::Passed,
                        confidence: Some(confidence),
                    },
                    candidate,
                );
            }
            return (
                MlMark {
                    item,
                    status: VerificationStatus::Warning,
                    confidence: Some(confidence),
                },
                None,
            );
        }

        // Faces present but none matched a known worker.
        let unknown = faces
            .iter()
            .map(|f| f.confidence.clamp(0.0, 1.0))
            .max_by(|a, b| a.total_cmp(b));
        let status = if unknown.is_some() {
            VerificationStatus::Warning
        } else {
            VerificationStatus::Failed
        };
        (
            MlMark {
                item,
                status,
                confidence: unknown,
            },
            None,
        )
    }
}
