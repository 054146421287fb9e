//! Store and engine configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base directory for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Fsync the journal every N entries (0 and 1 both mean every entry).
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./threadfork"),
            create_if_missing: true,
            sync_interval: 100,
        }
    }
}

/// How fork and merge assign ids to copied messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyIdMode {
    /// Fresh random id for every copy. A retried operation writes new rows.
    #[default]
    Random,

    /// Id derived from source message, destination branch and position.
    /// Retrying with the same destination branch id resumes the copy.
    Deterministic,
}

/// What a fork does when its cutoff message cannot be resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCutoffPolicy {
    /// Fail with a not-found error before any branch is created.
    #[default]
    Reject,

    /// Copy the whole parent log and report that the cutoff was not applied.
    FullCopy,
}

/// Fork and merge behaviour.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub copy_ids: CopyIdMode,
    pub missing_cutoff: MissingCutoffPolicy,
}

impl EngineConfig {
    /// Parse from a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::error::BranchError::validation("config", e.to_string()))
    }

    pub fn with_copy_ids(mut self, mode: CopyIdMode) -> Self {
        self.copy_ids = mode;
        self
    }

    pub fn with_missing_cutoff(mut self, policy: MissingCutoffPolicy) -> Self {
        self.missing_cutoff = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.copy_ids, CopyIdMode::Random);
        assert_eq!(config.missing_cutoff, MissingCutoffPolicy::Reject);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"copy_ids": "deterministic"}"#).unwrap();
        assert_eq!(config.copy_ids, CopyIdMode::Deterministic);
        assert_eq!(config.missing_cutoff, MissingCutoffPolicy::Reject);

        let config = EngineConfig::from_json(r#"{"missing_cutoff": "full_copy"}"#).unwrap();
        assert_eq!(config.missing_cutoff, MissingCutoffPolicy::FullCopy);
    }

    #[test]
    fn test_from_json_rejects_unknown_mode() {
        assert!(EngineConfig::from_json(r#"{"copy_ids": "sequential"}"#).is_err());
    }
}
