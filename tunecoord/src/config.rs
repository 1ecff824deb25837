//! Configuration file format and coordinator tuning knobs.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use tunecoord_protocol::{Channel, Program};

use crate::tuner::CompliancePolicy;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Coordinator timing and policy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Background timeshift recording is allowed.
    pub timeshift_enabled: bool,
    /// Timeshift window in minutes.
    pub timeshift_buffer_mins: u32,
    /// Delay between reaching Playing and the first timeshift attempt.
    pub timeshift_start_delay_ms: u64,
    /// Resource-path monitor poll interval.
    pub path_monitor_interval_ms: u64,
    pub signal_poll_interval_ms: u64,
    pub track_refresh_interval_ms: u64,
    pub parental_check_interval_ms: u64,
    /// Upper bound for the stream-change probe.
    pub probe_timeout_ms: u64,
    /// Fixed delay between finalize attempts and progress updates.
    pub finalize_retry_ms: u64,
    /// Delay before the live session retries timeshift after a recording ends.
    pub timeshift_retry_after_recording_ms: u64,
    /// How long a recording waits for the live session to stop timeshift.
    pub preempt_ack_timeout_ms: u64,
    pub mailbox_capacity: usize,
    /// Record duration ceiling when no program metadata is available.
    pub max_record_duration_secs: i64,
    /// Capacity used when the engine does not report a recorder count.
    pub fallback_recorders: u32,
    /// When set, explicit recordings do not preempt timeshift.
    pub timeshift_priority_high: bool,
    /// Request audio description on play.
    pub audio_description: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timeshift_enabled: true,
            timeshift_buffer_mins: 60,
            timeshift_start_delay_ms: 2000,
            path_monitor_interval_ms: 1000,
            signal_poll_interval_ms: 1000,
            track_refresh_interval_ms: 2000,
            parental_check_interval_ms: 2000,
            probe_timeout_ms: 10_000,
            finalize_retry_ms: 3000,
            timeshift_retry_after_recording_ms: 1000,
            preempt_ack_timeout_ms: 3000,
            mailbox_capacity: 64,
            max_record_duration_secs: 3 * 60 * 60,
            fallback_recorders: 1,
            timeshift_priority_high: false,
            audio_description: false,
        }
    }
}

impl CoordinatorConfig {
    pub fn timeshift_window_secs(&self) -> i64 {
        self.timeshift_buffer_mins as i64 * 60
    }

    pub fn finalize_retry(&self) -> Duration {
        Duration::from_millis(self.finalize_retry_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid("mailbox_capacity must be > 0".into()));
        }
        if self.timeshift_buffer_mins == 0 {
            return Err(ConfigError::Invalid("timeshift_buffer_mins must be > 0".into()));
        }
        if self.max_record_duration_secs <= 0 {
            return Err(ConfigError::Invalid(
                "max_record_duration_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Parental control settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParentalConfig {
    pub enabled: bool,
    /// Events rated at or above this age are blocked.
    pub min_blocked_age: u32,
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub compliance: CompliancePolicy,
    #[serde(default)]
    pub parental: ParentalConfig,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub programs: Vec<Program>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CatalogSection {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    config.coordinator.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let text = r#"
            [coordinator]
            timeshift_buffer_mins = 30
            timeshift_priority_high = true

            [compliance]
            cas_ready = true

            [parental]
            enabled = true
            min_blocked_age = 15

            [logging]
            level = "debug"

            [[channels]]
            id = 1
            dvb_uri = "dvb://233a.1041.1041"
            name = "One"

            [[programs]]
            id = 7
            channel_id = 1
            start_ms = 0
            end_ms = 3600000
        "#;
        let config: ConfigFile = toml::from_str(text).unwrap();
        assert_eq!(config.coordinator.timeshift_window_secs(), 1800);
        assert!(config.coordinator.timeshift_priority_high);
        assert_eq!(config.coordinator.finalize_retry_ms, 3000);
        assert!(config.compliance.forces_single_recorder());
        assert_eq!(config.parental.min_blocked_age, 15);
        assert_eq!(config.channels[0].dvb_uri, "dvb://233a.1041.1041");
        assert_eq!(config.programs[0].duration_secs(), 3600);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_defaults_and_validation() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert_eq!(config.coordinator.max_record_duration_secs, 10_800);
        assert!(config.coordinator.validate().is_ok());
        assert!(!config.compliance.forces_single_recorder());

        let bad = CoordinatorConfig {
            mailbox_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
    }
}
