//! Value objects describing the observed state of a state machine.
//!
//! Provider SDK responses are mapped into these types at the boundary so the
//! differ and planner never see vendor shapes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution history log level of a state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Log every execution event.
    #[default]
    All,
    /// Log errors only.
    Error,
    /// Log fatal errors only.
    Fatal,
    /// Logging disabled.
    Off,
}

/// Logging configuration of a state machine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    pub level: LogLevel,
    /// Whether execution input/output is included in log events.
    pub include_execution_data: bool,
    /// Destination log group ARN (`...:log-group:<name>:*`).
    pub destination: Option<String>,
}

/// A CloudWatch Logs subscription filter attached to a log group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Log group the filter belongs to.
    pub log_group: String,
    /// Filter name.
    pub filter_name: String,
    /// Forwarder (destination) ARN.
    pub forwarder_arn: String,
}

/// Fields returned by describing the state machine itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescription {
    /// State machine ARN.
    pub arn: String,
    /// State machine name.
    pub name: String,
    /// Execution role ARN.
    pub role_arn: String,
    /// Current logging configuration.
    pub logging: LoggingConfig,
}

/// Outcome of an idempotent policy creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCreation {
    /// The policy was created by this call.
    Created,
    /// A policy with the same name already existed; nothing was changed.
    AlreadyExists,
}

/// Complete observed state of one state machine, fetched fresh per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceState {
    /// State machine ARN.
    pub arn: String,
    /// State machine name.
    pub name: String,
    /// Execution role ARN.
    pub role_arn: String,
    /// Current logging configuration.
    pub logging: LoggingConfig,
    /// Names of managed policies attached to the execution role.
    pub attached_policies: BTreeSet<String>,
    /// Names of account policies known to exist (at least the desired one).
    pub existing_policies: BTreeSet<String>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Subscription filters by filter name.
    pub subscriptions: BTreeMap<String, Subscription>,
}

impl LoggingConfig {
    /// A configuration with logging turned off.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            level: LogLevel::Off,
            include_execution_data: false,
            destination: None,
        }
    }

    /// Creates an enabled configuration targeting a log group ARN.
    #[must_use]
    pub fn enabled(level: LogLevel, include_execution_data: bool, destination: impl Into<String>) -> Self {
        Self {
            level,
            include_execution_data,
            destination: Some(destination.into()),
        }
    }

    /// Returns true if execution logging is on.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self.level, LogLevel::Off)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ResourceState {
    /// Creates a state from a description with no tags, policies or
    /// subscriptions.
    #[must_use]
    pub fn from_description(description: ResourceDescription) -> Self {
        Self {
            arn: description.arn,
            name: description.name,
            role_arn: description.role_arn,
            logging: description.logging,
            attached_policies: BTreeSet::new(),
            existing_policies: BTreeSet::new(),
            tags: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "ALL",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Off => "OFF",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_enabled() {
            return write!(f, "logging off");
        }
        write!(f, "level {}", self.level)?;
        if self.include_execution_data {
            write!(f, " with execution data")?;
        }
        if let Some(destination) = &self.destination {
            write!(f, " -> {destination}")?;
        }
        Ok(())
    }
}
