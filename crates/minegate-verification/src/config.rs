//! Configuration for gate verification sessions

use serde::{Deserialize, Serialize};

use crate::detection::{DetectionInterpreter, DetectionMode};
use crate::error::VerificationError;
use crate::types::OperatorRole;

/// Verification policy and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Length of the verification window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u32,

    /// Period of the session timer tick in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Lowest role allowed to override a failed verdict
    #[serde(default = "default_min_override_role")]
    pub min_override_role: OperatorRole,

    /// Whether a `warning` verdict may still mark attendance
    #[serde(default)]
    pub warning_allows_attendance: bool,

    /// Minimum face-match confidence that identifies a worker
    #[serde(default = "default_identification_threshold")]
    pub identification_threshold: f64,

    /// Minimum PPE detection confidence for `passed`
    #[serde(default = "default_ml_pass_confidence")]
    pub ml_pass_confidence: f64,

    /// Minimum PPE detection confidence for `warning`
    #[serde(default = "default_ml_warning_confidence")]
    pub ml_warning_confidence: f64,

    /// Direction sent with detection requests
    #[serde(default)]
    pub detection_mode: DetectionMode,

    /// Accept keyboard-simulated RFID scans (demo mode)
    #[serde(default)]
    pub keyboard_rfid: bool,

    /// Capacity of the session event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Audit entries kept in memory before the oldest are evicted
    #[serde(default = "default_audit_retention")]
    pub audit_retention: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            min_override_role: default_min_override_role(),
            warning_allows_attendance: false,
            identification_threshold: default_identification_threshold(),
            ml_pass_confidence: default_ml_pass_confidence(),
            ml_warning_confidence: default_ml_warning_confidence(),
            detection_mode: DetectionMode::Entry,
            keyboard_rfid: false,
            event_capacity: default_event_capacity(),
            audit_retention: default_audit_retention(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_window_secs() -> u32 {
    30
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_min_override_role() -> OperatorRole {
    OperatorRole::Manager
}

fn default_identification_threshold() -> f64 {
    0.8
}

fn default_ml_pass_confidence() -> f64 {
    0.6
}

fn default_ml_warning_confidence() -> f64 {
    0.35
}

fn default_event_capacity() -> usize {
    256
}

fn default_audit_retention() -> usize {
    crate::audit::DEFAULT_RETENTION
}

fn default_log_level() -> String {
    "info".to_string()
}

impl VerificationConfig {
    /// Load configuration: defaults, then an optional file, then `MINEGATE_*`
    /// environment variables (nested keys use `__`, e.g. `MINEGATE_LOGGING__LEVEL`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&VerificationConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MINEGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Reject thresholds and timings that cannot describe a working session.
    pub fn validate(&self) -> Result<(), VerificationError> {
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("identification_threshold", self.identification_threshold),
            ("ml_pass_confidence", self.ml_pass_confidence),
            ("ml_warning_confidence", self.ml_warning_confidence),
        ] {
            if !unit.contains(&value) {
                return Err(VerificationError::InvalidInput(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.ml_warning_confidence > self.ml_pass_confidence {
            return Err(VerificationError::InvalidInput(
                "ml_warning_confidence must not exceed ml_pass_confidence".into(),
            ));
        }
        if self.window_secs == 0 {
            return Err(VerificationError::InvalidInput(
                "window_secs must be positive".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(VerificationError::InvalidInput(
                "tick_interval_ms must be positive".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(VerificationError::InvalidInput(
                "event_capacity must be positive".into(),
            ));
        }
        if self.audit_retention == 0 {
            return Err(VerificationError::InvalidInput(
                "audit_retention must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn interpreter(&self) -> DetectionInterpreter {
        DetectionInterpreter {
            pass_confidence: self.ml_pass_confidence,
            warning_confidence: self.ml_warning_confidence,
            identification_threshold: self.identification_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VerificationConfig::default();
        assert_eq!(config.window_secs, 30);
        assert_eq!(config.min_override_role, OperatorRole::Manager);
        assert!(!config.warning_allows_attendance);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = VerificationConfig::load(None).unwrap();
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.detection_mode, DetectionMode::Entry);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = VerificationConfig {
            ml_pass_confidence: 0.3,
            ml_warning_confidence: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VerificationConfig {
            identification_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_audit_retention() {
        assert_eq!(VerificationConfig::default().audit_retention, 10_000);
        let config = VerificationConfig {
            audit_retention: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
