use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::attendance::AttendanceRecord;
use crate::detection::{
    DetectionMode, DetectionResponse, DetectionSummary, Detections, FaceMatch, GateEntry,
    PpeDetection, ViolationDetection,
};
use crate::error::VerificationError;
use crate::traits::{AttendanceRecorder, GateApi};
use crate::types::{Frame, GateId, VerificationItemType, Worker};

/// A detection where every PPE item is present and the face matches `worker`.
pub fn compliant_response(worker: Worker, confidence: f64) -> DetectionResponse {
    DetectionResponse {
        success: true,
        entry: Some(GateEntry {
            id: uuid::Uuid::new_v4().to_string(),
            status: Some("pending".into()),
        }),
        violations: vec![],
        image: None,
        detections: Detections {
            ppe: VerificationItemType::PPE
                .iter()
                .map(|i| PpeDetection {
                    label: i.as_str().into(),
                    confidence: 0.9,
                })
                .collect(),
            faces: vec![FaceMatch {
                worker: Some(worker),
                confidence,
            }],
            violations: vec![],
            summary: DetectionSummary {
                compliant: true,
                ppe_count: 3,
                face_count: 1,
                violation_count: 0,
            },
        },
    }
}

/// A detection reporting `missing` items as violations.
pub fn violation_response(
    missing: &[VerificationItemType],
    face: Option<(Worker, f64)>,
) -> DetectionResponse {
    let mut response = match face {
        Some((worker, confidence)) => compliant_response(worker, confidence),
        None => {
            let mut r = compliant_response(Worker::new("unknown", "unknown"), 0.0);
            r.detections.faces.clear();
            r
        }
    };
    response
        .detections
        .ppe
        .retain(|p| !missing.iter().any(|m| m.as_str() == p.label));
    response.detections.violations = missing
        .iter()
        .map(|m| ViolationDetection {
            label: format!("no_{}", m.as_str()),
            confidence: Some(0.85),
        })
        .collect();
    response.detections.summary.compliant = missing.is_empty();
    response.detections.summary.violation_count = missing.len();
    response
}

/// Scripted Gate API for tests and the simulator.
///
/// Queued responses are served first, then the fallback.
pub struct MockGateApi {
    queued: Mutex<VecDeque<Result<DetectionResponse, VerificationError>>>,
    fallback: Result<DetectionResponse, VerificationError>,
    delay: Option<Duration>,
    detect_calls: AtomicUsize,
    overrides: Mutex<Vec<(String, String)>>,
}

impl MockGateApi {
    pub fn returning(response: DetectionResponse) -> Self {
        Self::with_fallback(Ok(response))
    }

    /// A backend that is never reachable.
    pub fn unavailable() -> Self {
        Self::with_fallback(Err(VerificationError::DetectionUnavailable(
            "mock backend unreachable".into(),
        )))
    }

    pub fn compliant(worker: Worker, confidence: f64) -> Self {
        Self::returning(compliant_response(worker, confidence))
    }

    fn with_fallback(fallback: Result<DetectionResponse, VerificationError>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            detect_calls: AtomicUsize::new(0),
            overrides: Mutex::new(Vec::new()),
        }
    }

    /// Delay every detection by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serve `response` before the fallback.
    pub fn then(self, response: Result<DetectionResponse, VerificationError>) -> Self {
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
        self
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    /// `(entry_id, reason)` pairs received by `override_entry`.
    pub fn override_calls(&self) -> Vec<(String, String)> {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl GateApi for MockGateApi {
    async fn detect(
        &self,
        _gate_id: &GateId,
        _frame: &Frame,
        _mode: DetectionMode,
    ) -> Result<DetectionResponse, VerificationError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    async fn override_entry(&self, entry_id: &str, reason: &str) -> Result<(), VerificationError> {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((entry_id.to_string(), reason.to_string()));
        Ok(())
    }
}

/// Attendance recorder that keeps records in memory.
pub struct MockAttendanceRecorder {
    records: Mutex<Vec<AttendanceRecord>>,
    calls: AtomicUsize,
    fail: bool,
}

impl MockAttendanceRecorder {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// A recorder whose backend always rejects.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockAttendanceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttendanceRecorder for MockAttendanceRecorder {
    async fn record_attendance(&self, record: &AttendanceRecord) -> Result<(), VerificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(VerificationError::AttendanceFailed(
                "mock recorder rejected".into(),
            ));
        }
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}
