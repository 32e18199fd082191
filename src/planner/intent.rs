//! Desired instrumentation intent for one state machine.
//!
//! An intent is derived once per run from configuration (and the ledger's
//! managed tag keys) and is never mutated while the run is in progress.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::json;

use crate::config::{InstrumentConfig, StateMachineConfig};
use crate::error::ConfigError;
use crate::remote::{Arn, LogLevel, LoggingConfig};

/// Actions granted by the logs delivery access policy.
const LOGS_DELIVERY_ACTIONS: &[&str] = &[
    "logs:CreateLogDelivery",
    "logs:CreateLogStream",
    "logs:GetLogDelivery",
    "logs:UpdateLogDelivery",
    "logs:DeleteLogDelivery",
    "logs:ListLogDeliveries",
    "logs:PutLogEvents",
    "logs:PutResourcePolicy",
    "logs:DescribeResourcePolicies",
    "logs:DescribeLogGroups",
];

/// The access policy to ensure on the execution role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyIntent {
    /// Policy name.
    pub name: String,
    /// Policy ARN in the state machine's account.
    pub arn: String,
    /// Policy document (JSON).
    pub document: String,
}

/// Desired instrumentation of one state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredIntent {
    /// State machine ARN.
    pub resource_arn: String,
    /// State machine name.
    pub resource_name: String,
    /// Target logging configuration; disabled when logging should be off.
    pub logging: LoggingConfig,
    /// Forwarder to subscribe to the execution log group, if any.
    pub forwarder_arn: Option<String>,
    /// Subscription filter name owned by this tool.
    pub subscription_filter: String,
    /// Tags that must be present with these values.
    pub tags: BTreeMap<String, String>,
    /// Tag keys this tool may remove.
    pub managed_tag_keys: BTreeSet<String>,
    /// Access policy to ensure attached.
    pub policy: PolicyIntent,
    #[serde(skip)]
    origin: Arn,
}

impl DesiredIntent {
    /// Creates the default intent for a state machine: logging at `ALL` with
    /// execution data into the vended logs group, the default access policy,
    /// no forwarder and no tags.
    ///
    /// # Errors
    ///
    /// Returns an error if `arn` is not a state machine ARN.
    pub fn for_state_machine(arn: &str) -> Result<Self, ConfigError> {
        let (origin, name) = Arn::parse_state_machine(arn)?;
        let destination = origin.log_group_destination(&format!("/aws/vendedlogs/states/{name}-Logs"));
        let policy_name = format!("LogsDeliveryAccessPolicy-{name}");

        Ok(Self {
            resource_arn: arn.to_string(),
            logging: LoggingConfig::enabled(LogLevel::All, true, destination),
            forwarder_arn: None,
            subscription_filter: format!("{name}-log-forwarder"),
            tags: BTreeMap::new(),
            managed_tag_keys: BTreeSet::new(),
            policy: PolicyIntent {
                arn: origin.customer_policy(&policy_name),
                name: policy_name,
                document: logs_delivery_policy_document(),
            },
            resource_name: name,
            origin,
        })
    }

    /// Derives the intent for a configured state machine.
    ///
    /// # Errors
    ///
    /// Returns an error if an ARN in the entry cannot be parsed.
    pub fn from_config(config: &InstrumentConfig, sm: &StateMachineConfig) -> Result<Self, ConfigError> {
        let mut intent = Self::for_state_machine(&sm.arn)?;

        intent.logging = if sm.logging.enabled {
            let destination = match &sm.logging.log_group_arn {
                Some(arn) => normalize_destination(arn)?,
                None => intent.logging.destination.clone().unwrap_or_default(),
            };
            LoggingConfig::enabled(sm.logging.level, sm.logging.include_execution_data, destination)
        } else {
            LoggingConfig::disabled()
        };

        if let Some(name) = &sm.policy_name {
            intent = intent.with_policy_name(name);
        }
        if let Some(filter) = &sm.subscription_filter {
            intent.subscription_filter.clone_from(filter);
        }

        Ok(intent
            .with_forwarder(config.effective_forwarder(sm).map(String::from))
            .with_tags(config.effective_tags(sm)))
    }

    /// Sets the forwarder.
    #[must_use]
    pub fn with_forwarder(mut self, forwarder_arn: Option<String>) -> Self {
        self.forwarder_arn = forwarder_arn;
        self
    }

    /// Sets the target logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Sets the desired tags; their keys become managed.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.managed_tag_keys.extend(tags.keys().cloned());
        self.tags = tags;
        self
    }

    /// Adds keys the tool has set on earlier runs to the managed set.
    #[must_use]
    pub fn with_managed_tag_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.managed_tag_keys.extend(keys);
        self
    }

    /// Overrides the access policy name, keeping the policy in the state
    /// machine's account.
    #[must_use]
    pub fn with_policy_name(mut self, name: &str) -> Self {
        self.policy.arn = self.origin.customer_policy(name);
        self.policy.name = name.to_string();
        self
    }

    /// Name of the log group the forwarder subscribes to: the target logging
    /// destination. `None` when logging is off or the destination is not a
    /// log group ARN.
    #[must_use]
    pub fn subscription_log_group(&self) -> Option<String> {
        if !self.logging.is_enabled() {
            return None;
        }
        let destination = Arn::parse(self.logging.destination.as_deref()?).ok()?;
        destination.log_group_name().map(String::from)
    }
}

/// Builds the policy granting Step Functions log delivery to CloudWatch Logs.
#[must_use]
pub fn logs_delivery_policy_document() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": LOGS_DELIVERY_ACTIONS,
            "Resource": "*",
        }],
    })
    .to_string()
}

/// Accepts a log group ARN with or without the `:*` suffix and returns the
/// suffixed form logging destinations require.
fn normalize_destination(arn: &str) -> Result<String, ConfigError> {
    let parsed = Arn::parse(arn)?;
    let Some(group) = parsed.log_group_name() else {
        return Err(ConfigError::invalid_arn(arn, "not a CloudWatch Logs log group ARN"));
    };
    Ok(parsed.log_group_destination(group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingSpec;

    const SM_ARN: &str = "arn:aws:states:us-east-1:123456789012:stateMachine:orders";

    fn config_with(sm: StateMachineConfig) -> InstrumentConfig {
        InstrumentConfig {
            aws: crate::config::AwsSettings::default(),
            state: crate::config::StateConfig::default(),
            forwarder_arn: Some(String::from("arn:aws:lambda:us-east-1:123456789012:function:fwd")),
            tags: BTreeMap::from([(String::from("team"), String::from("data"))]),
            state_machines: vec![sm],
        }
    }

    fn machine() -> StateMachineConfig {
        StateMachineConfig {
            arn: SM_ARN.to_string(),
            forwarder_arn: None,
            logging: LoggingSpec::default(),
            tags: BTreeMap::new(),
            policy_name: None,
            subscription_filter: None,
        }
    }

    #[test]
    fn test_defaults_derived_from_arn() {
        let intent = DesiredIntent::for_state_machine(SM_ARN).unwrap();

        assert_eq!(intent.resource_name, "orders");
        assert_eq!(intent.policy.name, "LogsDeliveryAccessPolicy-orders");
        assert_eq!(
            intent.policy.arn,
            "arn:aws:iam::123456789012:policy/LogsDeliveryAccessPolicy-orders"
        );
        assert_eq!(intent.subscription_filter, "orders-log-forwarder");
        assert_eq!(
            intent.logging.destination.as_deref(),
            Some("arn:aws:logs:us-east-1:123456789012:log-group:/aws/vendedlogs/states/orders-Logs:*")
        );
        assert_eq!(
            intent.subscription_log_group().as_deref(),
            Some("/aws/vendedlogs/states/orders-Logs")
        );
    }

    #[test]
    fn test_policy_document_grants_delivery_actions() {
        let doc: serde_json::Value = serde_json::from_str(&logs_delivery_policy_document()).unwrap();
        assert_eq!(doc["Version"], "2012-10-17");
        assert_eq!(doc["Statement"][0]["Resource"], "*");
        let actions = doc["Statement"][0]["Action"].as_array().unwrap();
        assert_eq!(actions.len(), LOGS_DELIVERY_ACTIONS.len());
        assert!(actions.iter().any(|a| a == "logs:PutLogEvents"));
    }

    #[test]
    fn test_from_config_merges_defaults() {
        let mut sm = machine();
        sm.tags.insert(String::from("env"), String::from("prod"));
        sm.logging.log_group_arn = Some(String::from("arn:aws:logs:us-east-1:123456789012:log-group:custom"));
        let config = config_with(sm.clone());

        let intent = DesiredIntent::from_config(&config, &sm).unwrap();

        assert!(intent.forwarder_arn.as_deref().unwrap().ends_with(":fwd"));
        assert_eq!(intent.tags.len(), 2);
        assert!(intent.managed_tag_keys.contains("team"));
        assert!(intent.managed_tag_keys.contains("env"));
        assert_eq!(
            intent.logging.destination.as_deref(),
            Some("arn:aws:logs:us-east-1:123456789012:log-group:custom:*")
        );
    }

    #[test]
    fn test_disabled_logging_has_no_subscription_group() {
        let mut sm = machine();
        sm.logging.enabled = false;
        let config = config_with(sm.clone());

        let intent = DesiredIntent::from_config(&config, &sm).unwrap();
        assert!(!intent.logging.is_enabled());
        assert!(intent.subscription_log_group().is_none());
    }

    #[test]
    fn test_policy_name_override_stays_in_account() {
        let intent = DesiredIntent::for_state_machine(SM_ARN)
            .unwrap()
            .with_policy_name("SharedLogsPolicy");
        assert_eq!(intent.policy.arn, "arn:aws:iam::123456789012:policy/SharedLogsPolicy");
    }

    #[test]
    fn test_managed_keys_are_unioned() {
        let intent = DesiredIntent::for_state_machine(SM_ARN)
            .unwrap()
            .with_tags(BTreeMap::from([(String::from("env"), String::from("prod"))]))
            .with_managed_tag_keys([String::from("owner")]);
        assert_eq!(intent.managed_tag_keys.len(), 2);
    }
}
