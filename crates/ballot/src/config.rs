//! Election configuration.
//!
//! An [`ElectionConfig`] is built once at startup and shared read-only (behind
//! an `Arc`) by every component. Nothing in the crate reads configuration from
//! globals.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::event::VoterId;

/// A candidate on the ballot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Stable key carried by selection buttons.
    pub key: String,
    /// Name shown to voters and written to the votes table.
    pub label: String,
}

impl Candidate {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// Number of codes to issue for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassQuota {
    pub class_name: String,
    pub student_count: u32,
}

/// How concurrent claims on the same code are handled.
///
/// The store has no compare-and-swap, so two sessions that both saw a code
/// as unused can both write the claim cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    /// Claims for a code are reserved in-process before any write; the
    /// second claimant is refused.
    #[default]
    Serialized,
    /// No coordination: last claim write wins and a stray extra vote row is
    /// possible if two sessions race on one code.
    Unserialized,
}

fn default_session_timeout_secs() -> u64 {
    3600
}

fn default_store_timeout_secs() -> u64 {
    30
}

fn default_utc_offset_minutes() -> i32 {
    120
}

fn default_callback_prefix() -> String {
    "vote_".to_string()
}

/// Telegram rejects inline buttons whose `callback_data` exceeds this.
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

/// Immutable description of one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Ballot order. Also the tie-break order of the tally.
    pub candidates: Vec<Candidate>,
    pub classes: Vec<ClassQuota>,
    /// Identities allowed to request results.
    #[serde(default)]
    pub admins: Vec<VoterId>,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Deadline for a single store call. An expired call counts as the
    /// store being unavailable.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default)]
    pub claim_policy: ClaimPolicy,
    /// Offset applied to vote timestamps.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Prefix of candidate button payloads, followed by the candidate key.
    #[serde(default = "default_callback_prefix")]
    pub callback_prefix: String,
}

impl ElectionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidates.is_empty() {
            return Err(ConfigError::Invalid("no candidates configured".into()));
        }
        let mut keys = HashSet::new();
        let mut labels = HashSet::new();
        for candidate in &self.candidates {
            if candidate.key.trim().is_empty() || candidate.label.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "candidate {:?} has an empty key or label",
                    candidate
                )));
            }
            if !keys.insert(candidate.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate candidate key {:?}",
                    candidate.key
                )));
            }
            if !labels.insert(candidate.label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate candidate label {:?}",
                    candidate.label
                )));
            }
        }
        if self.session_timeout_secs == 0 {
            return Err(ConfigError::Invalid("session timeout must be positive".into()));
        }
        if self.store_timeout_secs == 0 {
            return Err(ConfigError::Invalid("store timeout must be positive".into()));
        }
        if self.callback_prefix.is_empty() {
            return Err(ConfigError::Invalid("callback prefix must not be empty".into()));
        }
        for candidate in &self.candidates {
            let data = self.callback_data(candidate);
            if data.len() > MAX_CALLBACK_DATA_BYTES {
                return Err(ConfigError::Invalid(format!(
                    "button payload {:?} is {} bytes, the limit is {}",
                    data,
                    data.len(),
                    MAX_CALLBACK_DATA_BYTES
                )));
            }
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn candidate(&self, key: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.key == key)
    }

    pub fn is_admin(&self, voter: &VoterId) -> bool {
        self.admins.contains(voter)
    }

    /// Number of codes the roster asks for, i.e. potential voters.
    pub fn eligible_voters(&self) -> u64 {
        self.classes.iter().map(|c| u64::from(c.student_count)).sum()
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "utc offset of {} minutes is out of range",
                    self.utc_offset_minutes
                ))
            })
    }

    /// Offset for vote timestamps. A validated config never falls back to UTC.
    pub fn timestamp_offset(&self) -> FixedOffset {
        self.utc_offset().unwrap_or_else(|_| Utc.fix())
    }

    /// Button payload for a candidate.
    pub fn callback_data(&self, candidate: &Candidate) -> String {
        format!("{}{}", self.callback_prefix, candidate.key)
    }

    /// Candidate key from a button payload, if it follows the grammar.
    pub fn parse_callback<'a>(&self, data: &'a str) -> Option<&'a str> {
        data.strip_prefix(self.callback_prefix.as_str())
            .filter(|key| !key.is_empty())
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        let classes = [("7-А", 25), ("7-Б", 25), ("6-Б", 28), ("6-А", 27), ("6-В", 26)]
            .into_iter()
            .map(|(class_name, student_count)| ClassQuota {
                class_name: class_name.to_string(),
                student_count,
            })
            .collect();

        Self {
            candidates: vec![
                Candidate::new("Viktoriia Kochut", "Вікторія Кочут"),
                Candidate::new("Oleksandr Bilostotskyi", "Білостоцький Олександр"),
                Candidate::new("Yeva Baziuta", "Єва Базюта"),
                Candidate::new("Anna Strilchuk", "Анна Стрільчук"),
            ],
            classes,
            admins: Vec::new(),
            session_timeout_secs: default_session_timeout_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            claim_policy: ClaimPolicy::default(),
            utc_offset_minutes: default_utc_offset_minutes(),
            callback_prefix: default_callback_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ElectionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.eligible_voters(), 131);
        assert_eq!(config.session_timeout(), Duration::from_secs(3600));
        assert_eq!(config.claim_policy, ClaimPolicy::Serialized);
    }

    #[test]
    fn parses_minimal_json_with_defaults() {
        let config = ElectionConfig::from_json_str(
            r#"{
                "candidates": [{"key": "a", "label": "Alice"}, {"key": "b", "label": "Bob"}],
                "classes": [{"class_name": "5-A", "student_count": 3}],
                "admins": [42],
                "claim_policy": "unserialized"
            }"#,
        )
        .unwrap();

        assert_eq!(config.candidates.len(), 2);
        assert!(config.is_admin(&VoterId::from(42)));
        assert!(!config.is_admin(&VoterId::from(43)));
        assert_eq!(config.claim_policy, ClaimPolicy::Unserialized);
        assert_eq!(config.session_timeout_secs, 3600);
        assert_eq!(config.store_timeout(), Duration::from_secs(30));
        assert_eq!(config.callback_prefix, "vote_");
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = ElectionConfig::from_json_str(
            r#"{
                "candidates": [{"key": "a", "label": "Alice"}, {"key": "a", "label": "Bob"}],
                "classes": []
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate candidate key"));
    }

    #[test]
    fn rejects_empty_ballot() {
        let err = ElectionConfig::from_json_str(r#"{"candidates": [], "classes": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn callback_grammar() {
        let config = ElectionConfig::default();
        let candidate = &config.candidates[0];
        let data = config.callback_data(candidate);
        assert_eq!(data, "vote_Viktoriia Kochut");
        assert_eq!(config.parse_callback(&data), Some("Viktoriia Kochut"));
        assert_eq!(config.parse_callback("vote_"), None);
        assert_eq!(config.parse_callback("poll_Viktoriia Kochut"), None);
    }

    #[test]
    fn rejects_overflowing_utc_offset() {
        let config = ElectionConfig {
            utc_offset_minutes: i32::MAX,
            ..ElectionConfig::default()
        };
        assert!(matches!(config.utc_offset(), Err(ConfigError::Invalid(_))));
        assert!(config.validate().is_err());

        let config = ElectionConfig {
            utc_offset_minutes: i32::MIN,
            ..ElectionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_button_payload_over_telegram_limit() {
        let mut config = ElectionConfig::default();
        config.candidates[0].key = "k".repeat(MAX_CALLBACK_DATA_BYTES);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("button payload"));

        // Exactly at the limit is fine.
        config.candidates[0].key = "k".repeat(MAX_CALLBACK_DATA_BYTES - "vote_".len());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_store_timeout() {
        let config = ElectionConfig {
            store_timeout_secs: 0,
            ..ElectionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
