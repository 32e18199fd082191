//! Ledger types recording what the tool has done to each state machine.
//!
//! The ledger is not a cache of remote state: remote state is always read
//! fresh. It remembers which tag keys this tool owns and how past runs ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::error::StateError;

/// Current version of the ledger format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept per resource.
const MAX_HISTORY: usize = 100;

/// Ledger record for one state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Ledger format version.
    pub version: String,
    /// State machine ARN.
    pub resource_arn: String,
    /// Hash of the last intent applied successfully.
    pub intent_hash: String,
    /// Tag keys this tool has set and may therefore remove.
    #[serde(default)]
    pub managed_tag_keys: BTreeSet<String>,
    /// When the record was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A single reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Hash of the intent the run worked toward.
    pub intent_hash: String,
    /// Planned operations, described.
    pub operations: Vec<String>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Forward error, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// Operations still applied after a failed rollback.
    #[serde(default)]
    pub remaining: Vec<String>,
}

/// How a recorded run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Nothing needed to change.
    NoChange,
    /// The plan was applied.
    Applied,
    /// The plan failed and was reverted.
    RolledBack,
    /// The plan failed and some changes could not be reverted.
    RollbackIncomplete,
}

/// Returns the storage key for a resource: a readable name plus a hash of
/// the full ARN.
#[must_use]
pub fn storage_key(resource_arn: &str) -> String {
    let name: String = resource_arn
        .rsplit(':')
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(resource_arn.as_bytes()));
    format!("{name}-{}", &digest[..12])
}

impl ResourceRecord {
    /// Creates an empty record for a resource.
    #[must_use]
    pub fn new(resource_arn: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            resource_arn: resource_arn.to_string(),
            intent_hash: String::new(),
            managed_tag_keys: BTreeSet::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Rejects records written by an incompatible ledger format.
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` if the version differs.
    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            })
        }
    }

    /// Adds a history entry, dropping the oldest beyond the cap.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.last_updated = Utc::now();
    }

    /// Returns the most recent run.
    #[must_use]
    pub fn last_run(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoChange => "no change",
            Self::Applied => "applied",
            Self::RolledBack => "rolled back",
            Self::RollbackIncomplete => "rollback incomplete",
        };
        write!(f, "{s}")
    }
}
