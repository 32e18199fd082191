//! Configuration validation.
//!
//! This module checks a configuration before any remote call is made and
//! collects every error and warning instead of stopping at the first one.

use crate::error::{ConfigError, Result};
use crate::remote::Arn;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::spec::{InstrumentConfig, StateBackend, StateConfig, StateMachineConfig};

/// Services a log forwarder may live in.
const FORWARDER_SERVICES: &[&str] = &["lambda", "kinesis", "firehose", "logs"];

/// Maximum tag key length.
const MAX_TAG_KEY_LEN: usize = 128;

/// Maximum tag value length.
const MAX_TAG_VALUE_LEN: usize = 256;

/// Validator for configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails; [`Self::check`] returns
    /// all of them.
    pub fn validate(&self, config: &InstrumentConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }
            .into());
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Collects every error and warning of a configuration.
    #[must_use]
    pub fn check(&self, config: &InstrumentConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_state(&config.state, &mut result);
        if let Some(forwarder) = &config.forwarder_arn {
            Self::validate_forwarder(forwarder, "forwarder_arn", &mut result);
        }
        Self::validate_tags(&config.tags, "tags", &mut result);
        Self::validate_state_machines(config, &mut result);

        result
    }

    /// Validates ledger configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket: ignored with the local backend"));
                }
            }
        }
    }

    fn validate_state_machines(config: &InstrumentConfig, result: &mut ValidationResult) {
        if config.state_machines.is_empty() {
            result.warnings.push(String::from("No state machines defined in configuration"));
            return;
        }

        let mut seen = HashSet::new();

        for (i, sm) in config.state_machines.iter().enumerate() {
            let prefix = format!("state_machines[{i}]");

            if !seen.insert(sm.arn.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.arn"),
                    message: ConfigError::DuplicateStateMachine { arn: sm.arn.clone() }.to_string(),
                });
            }

            if let Err(e) = Arn::parse_state_machine(&sm.arn) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.arn"),
                    message: e.to_string(),
                });
            }

            if let Some(forwarder) = &sm.forwarder_arn {
                Self::validate_forwarder(forwarder, &format!("{prefix}.forwarder_arn"), result);
            }

            Self::validate_logging(config, sm, &prefix, result);
            Self::validate_tags(&sm.tags, &format!("{prefix}.tags"), result);

            if let Some(name) = &sm.policy_name
                && !is_valid_policy_name(name)
            {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.policy_name"),
                    message: format!("Policy name '{name}' is invalid"),
                });
            }

            if sm.subscription_filter.as_ref().is_some_and(|f| f.is_empty() || f.contains(':') || f.contains('*')) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.subscription_filter"),
                    message: String::from("Filter name must be non-empty and contain no ':' or '*'"),
                });
            }
        }
    }

    fn validate_logging(
        config: &InstrumentConfig,
        sm: &StateMachineConfig,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        if let Some(group) = &sm.logging.log_group_arn {
            let is_log_group = Arn::parse(group).ok().is_some_and(|a| a.log_group_name().is_some());
            if !is_log_group {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.logging.log_group_arn"),
                    message: format!("'{group}' is not a CloudWatch Logs log group ARN"),
                });
            }
        }

        if !sm.logging.enabled && config.effective_forwarder(sm).is_some() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.logging.enabled"),
                message: String::from("A forwarder needs logging enabled to have a log group to subscribe to"),
            });
        }

        if !sm.logging.enabled && sm.logging.log_group_arn.is_some() {
            result.warnings.push(format!(
                "{prefix}.logging.log_group_arn: ignored while logging is disabled"
            ));
        }
    }

    fn validate_forwarder(forwarder: &str, field: &str, result: &mut ValidationResult) {
        match Arn::parse(forwarder) {
            Ok(arn) if FORWARDER_SERVICES.contains(&arn.service.as_str()) => {}
            Ok(arn) => result.errors.push(ValidationError {
                field: field.to_string(),
                message: format!(
                    "Forwarder must be a Lambda, Kinesis, Firehose or Logs destination, got service '{}'",
                    arn.service
                ),
            }),
            Err(e) => result.errors.push(ValidationError {
                field: field.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn validate_tags(tags: &BTreeMap<String, String>, prefix: &str, result: &mut ValidationResult) {
        for (key, value) in tags {
            let field = format!("{prefix}.{key}");

            if key.is_empty() || key.chars().count() > MAX_TAG_KEY_LEN {
                result.errors.push(ValidationError {
                    field: field.clone(),
                    message: format!("Tag key must be 1 to {MAX_TAG_KEY_LEN} characters"),
                });
            }

            if key.to_ascii_lowercase().starts_with("aws:") {
                result.errors.push(ValidationError {
                    field: field.clone(),
                    message: String::from("Tag keys starting with 'aws:' are reserved"),
                });
            }

            if value.chars().count() > MAX_TAG_VALUE_LEN {
                result.errors.push(ValidationError {
                    field,
                    message: format!("Tag value must be at most {MAX_TAG_VALUE_LEN} characters"),
                });
            }
        }
    }
}

/// IAM policy names: 1 to 128 characters from `[A-Za-z0-9+=,.@_-]`.
fn is_valid_policy_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c))
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> InstrumentConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        let config = parse(
            r"
forwarder_arn: arn:aws:lambda:us-east-1:123456789012:function:fwd
state_machines:
  - arn: arn:aws:states:us-east-1:123456789012:stateMachine:orders
    tags:
      env: prod
",
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_collects_all_errors() {
        let config = parse(
            r"
state:
  backend: s3
forwarder_arn: arn:aws:sqs:us-east-1:123456789012:queue
state_machines:
  - arn: arn:aws:states:us-east-1:123456789012:stateMachine:orders
    tags:
      'aws:reserved': x
  - arn: arn:aws:states:us-east-1:123456789012:stateMachine:orders
  - arn: not-an-arn
",
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"state.bucket"));
        assert!(fields.contains(&"forwarder_arn"));
        assert!(fields.contains(&"state_machines[0].tags.aws:reserved"));
        assert!(fields.contains(&"state_machines[1].arn"));
        assert!(fields.contains(&"state_machines[2].arn"));
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_forwarder_requires_logging() {
        let config = parse(
            r"
forwarder_arn: arn:aws:lambda:us-east-1:123456789012:function:fwd
state_machines:
  - arn: arn:aws:states:us-east-1:123456789012:stateMachine:orders
    logging:
      enabled: false
",
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "state_machines[0].logging.enabled");
    }

    #[test]
    fn test_policy_name_charset() {
        assert!(is_valid_policy_name("LogsDeliveryAccessPolicy-orders"));
        assert!(!is_valid_policy_name("has space"));
        assert!(!is_valid_policy_name(""));
    }
}
