// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Channel configuration, `serde`-deserializable the way
//! `format/mod.rs`'s `RecordingMetadata` is, so it can be
//! loaded from TOML or JSON instead of being assembled by hand in tests.

use crate::error::{ConfigError, MefError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Time-offset storage policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOffsetMode {
    /// Store absolute µs Unix-epoch times verbatim.
    Ignore,
    /// Store `(t - anchor)` everywhere, anchor computed on first data.
    Apply,
    /// Like `Apply`, but in-memory values stay absolute until serialized.
    ApplyOnOutput,
}

impl Default for TimeOffsetMode {
    fn default() -> Self {
        TimeOffsetMode::Ignore
    }
}

impl TimeOffsetMode {
    pub fn offsets_are_applied(self) -> bool {
        matches!(self, TimeOffsetMode::Apply | TimeOffsetMode::ApplyOnOutput)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSettings {
    pub low_frequency_filter_setting: f64,
    pub high_frequency_filter_setting: f64,
    pub notch_filter_frequency: f64,
    pub ac_line_frequency: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub subject_first_name: Option<String>,
    pub subject_second_name: Option<String>,
    pub subject_id: Option<String>,
    pub institution: Option<String>,
    pub study_comments: Option<String>,
    pub channel_comments: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PasswordConfig {
    pub level_1: Option<String>,
    pub level_2: Option<String>,
}

impl PasswordConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.level_1, &self.level_2) {
            (None, Some(_)) => Err(ConfigError::Level2WithoutLevel1),
            (Some(l1), Some(l2)) if l1 == l2 => Err(ConfigError::PasswordsMustDiffer),
            _ => Ok(()),
        }
    }
}

/// Everything a channel needs to open its files and start accepting samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub session_directory: PathBuf,
    pub session_name: String,
    pub channel_name: String,
    pub anonymized_subject_name: String,
    pub session_description: Option<String>,

    pub secs_per_block: f64,
    pub sampling_frequency: f64,
    pub block_interval_us: i64,
    pub bit_shift_flag: bool,
    pub filter: FilterSettings,
    pub units_conversion_factor: f64,
    pub subject: SubjectInfo,
    pub password: PasswordConfig,
    pub segment_duration_us: u64,
    pub time_offset_mode: TimeOffsetMode,
    pub gmt_offset_hours: f32,
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.password.validate()?;
        if self.block_interval_us <= 0 {
            return Err(ConfigError::NonPositiveBlockInterval);
        }
        if self.sampling_frequency <= 0.0 {
            return Err(ConfigError::NonPositiveSamplingFrequency);
        }
        Ok(())
    }

    /// Samples-per-block, `ceil(secs_per_block * sampling_frequency)`,
    /// matching `write_mef_channel_data`'s `block_len` computation.
    pub fn block_len(&self) -> usize {
        (self.secs_per_block * self.sampling_frequency).ceil() as usize
    }

    /// Parses a `ChannelConfig` from a JSON document, the way
    /// `recorder.rs`'s configuration loader reads its own JSON file
    /// instead of requiring callers to assemble the struct by hand.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::InvalidJson)
    }

    pub fn from_json_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MefError::io(path.display().to_string(), e))?;
        Ok(Self::from_json(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level2_without_level1_is_rejected() {
        let cfg = PasswordConfig {
            level_1: None,
            level_2: Some("x".into()),
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Level2WithoutLevel1)
        ));
    }

    #[test]
    fn equal_passwords_are_rejected() {
        let cfg = PasswordConfig {
            level_1: Some("same".into()),
            level_2: Some("same".into()),
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PasswordsMustDiffer)
        ));
    }

    #[test]
    fn distinct_passwords_are_accepted() {
        let cfg = PasswordConfig {
            level_1: Some("a".into()),
            level_2: Some("b".into()),
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn from_json_roundtrips_a_channel_config() {
        let original = ChannelConfig {
            session_directory: PathBuf::from("/tmp/sess"),
            session_name: "sess".into(),
            channel_name: "eeg_fp1".into(),
            anonymized_subject_name: "anon".into(),
            session_description: Some("roundtrip test".into()),
            secs_per_block: 1.0,
            sampling_frequency: 1000.0,
            block_interval_us: 1_000_000,
            bit_shift_flag: true,
            filter: FilterSettings::default(),
            units_conversion_factor: 1.0,
            subject: SubjectInfo::default(),
            password: PasswordConfig::default(),
            segment_duration_us: 3_600_000_000,
            time_offset_mode: TimeOffsetMode::Apply,
            gmt_offset_hours: -6.0,
        };
        let json = serde_json::to_string(&original).unwrap();
        let parsed = ChannelConfig::from_json(&json).unwrap();
        assert_eq!(parsed.channel_name, original.channel_name);
        assert_eq!(parsed.bit_shift_flag, original.bit_shift_flag);
        assert_eq!(parsed.time_offset_mode, original.time_offset_mode);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        assert!(ChannelConfig::from_json("not json").is_err());
    }
}
