//! Configuration specification types for the instrumentation tool.
//!
//! This module defines the structs that map to the `sfn-instrument.yaml` file.
//! Each entry under `state_machines` fully describes the instrumentation one
//! state machine should end up with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::remote::LogLevel;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstrumentConfig {
    /// AWS client settings.
    #[serde(default)]
    pub aws: AwsSettings,
    /// Ledger backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Default forwarder ARN for every state machine.
    #[serde(default)]
    pub forwarder_arn: Option<String>,
    /// Tags applied to every state machine (per-machine tags win).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// State machines to instrument.
    pub state_machines: Vec<StateMachineConfig>,
}

/// AWS client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AwsSettings {
    /// Region override; the default provider chain is used otherwise.
    #[serde(default)]
    pub region: Option<String>,
}

/// Ledger backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local ledger directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based ledger.
    #[default]
    Local,
    /// AWS S3-based ledger.
    S3,
}

/// Desired instrumentation of one state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateMachineConfig {
    /// State machine ARN.
    pub arn: String,
    /// Forwarder ARN; overrides the top-level default.
    #[serde(default)]
    pub forwarder_arn: Option<String>,
    /// Execution logging settings.
    #[serde(default)]
    pub logging: LoggingSpec,
    /// Tags for this state machine.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Access policy name; defaults to `LogsDeliveryAccessPolicy-<name>`.
    #[serde(default)]
    pub policy_name: Option<String>,
    /// Subscription filter name; defaults to `<name>-log-forwarder`.
    #[serde(default)]
    pub subscription_filter: Option<String>,
}

/// Execution logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSpec {
    /// Whether logging should be on.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Destination log group ARN; defaults to the vended logs group.
    #[serde(default)]
    pub log_group_arn: Option<String>,
    /// Log level when enabled.
    #[serde(default)]
    pub level: LogLevel,
    /// Whether execution input and output are logged.
    #[serde(default = "default_true")]
    pub include_execution_data: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            log_group_arn: None,
            level: LogLevel::All,
            include_execution_data: true,
        }
    }
}

impl InstrumentConfig {
    /// Finds a state machine entry by ARN.
    #[must_use]
    pub fn find_state_machine(&self, arn: &str) -> Option<&StateMachineConfig> {
        self.state_machines.iter().find(|sm| sm.arn == arn)
    }

    /// Returns the forwarder for a state machine, falling back to the default.
    #[must_use]
    pub fn effective_forwarder<'a>(&'a self, sm: &'a StateMachineConfig) -> Option<&'a str> {
        sm.forwarder_arn.as_deref().or(self.forwarder_arn.as_deref())
    }

    /// Returns the merged tags of a state machine.
    #[must_use]
    pub fn effective_tags(&self, sm: &StateMachineConfig) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.extend(sm.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        tags
    }
}
