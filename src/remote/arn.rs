//! Amazon Resource Name parsing.
//!
//! Everything the reconciler derives from a state machine (its name, the
//! default log group, the access policy ARN, the execution role name) is
//! computed from ARNs, so parsing lives in one place.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A parsed ARN: `arn:<partition>:<service>:<region>:<account>:<resource>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
    /// Partition (`aws`, `aws-cn`, `aws-us-gov`, ...).
    pub partition: String,
    /// Service namespace (`states`, `logs`, `lambda`, `iam`, ...).
    pub service: String,
    /// Region, empty for global services such as IAM.
    pub region: String,
    /// Twelve-digit account id, empty for AWS-managed resources.
    pub account: String,
    /// Everything after the account field.
    pub resource: String,
}

impl Arn {
    /// Parses an ARN string.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not have the six ARN fields.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let mut parts = value.splitn(6, ':');
        let (Some(prefix), Some(partition), Some(service), Some(region), Some(account), Some(resource)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(ConfigError::invalid_arn(value, "expected 6 colon-separated fields"));
        };

        if prefix != "arn" {
            return Err(ConfigError::invalid_arn(value, "must start with 'arn:'"));
        }
        if partition.is_empty() || service.is_empty() || resource.is_empty() {
            return Err(ConfigError::invalid_arn(value, "partition, service and resource are required"));
        }
        if !account.is_empty() && (account.len() != 12 || !account.bytes().all(|b| b.is_ascii_digit())) {
            return Err(ConfigError::invalid_arn(value, "account id must be 12 digits"));
        }

        Ok(Self {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account: account.to_string(),
            resource: resource.to_string(),
        })
    }

    /// Parses a Step Functions state machine ARN and returns it with the
    /// machine name.
    ///
    /// # Errors
    ///
    /// Returns an error if the ARN is not a `states:...:stateMachine:<name>`.
    pub fn parse_state_machine(value: &str) -> Result<(Self, String), ConfigError> {
        let arn = Self::parse(value)?;
        if arn.service != "states" {
            return Err(ConfigError::invalid_arn(value, "not a Step Functions ARN"));
        }
        let name = arn
            .resource
            .strip_prefix("stateMachine:")
            .filter(|n| !n.is_empty() && !n.contains(':'))
            .ok_or_else(|| ConfigError::invalid_arn(value, "not a state machine ARN"))?
            .to_string();
        Ok((arn, name))
    }

    /// Returns the log group name of a CloudWatch Logs log-group ARN.
    ///
    /// Accepts both `log-group:<name>` and the `log-group:<name>:*` form that
    /// Step Functions requires for logging destinations.
    #[must_use]
    pub fn log_group_name(&self) -> Option<&str> {
        if self.service != "logs" {
            return None;
        }
        let name = self.resource.strip_prefix("log-group:")?;
        let name = name.strip_suffix(":*").unwrap_or(name);
        (!name.is_empty()).then_some(name)
    }

    /// Returns the last path segment of an IAM role ARN.
    ///
    /// `role/service-role/MyRole` yields `MyRole`.
    #[must_use]
    pub fn role_name(&self) -> Option<&str> {
        if self.service != "iam" {
            return None;
        }
        let path = self.resource.strip_prefix("role/")?;
        path.rsplit('/').next().filter(|n| !n.is_empty())
    }

    /// Builds a log-group ARN usable as a Step Functions logging destination.
    #[must_use]
    pub fn log_group_destination(&self, log_group_name: &str) -> String {
        format!(
            "arn:{}:logs:{}:{}:log-group:{log_group_name}:*",
            self.partition, self.region, self.account
        )
    }

    /// Builds the ARN of a customer-managed IAM policy in this ARN's account.
    #[must_use]
    pub fn customer_policy(&self, policy_name: &str) -> String {
        format!("arn:{}:iam::{}:policy/{policy_name}", self.partition, self.account)
    }
}

impl FromStr for Arn {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SM_ARN: &str = "arn:aws:states:us-east-1:123456789012:stateMachine:orders";

    #[test]
    fn test_parse_state_machine() {
        let (arn, name) = Arn::parse_state_machine(SM_ARN).unwrap();
        assert_eq!(name, "orders");
        assert_eq!(arn.region, "us-east-1");
        assert_eq!(arn.account, "123456789012");
        assert_eq!(arn.to_string(), SM_ARN);
    }

    #[test]
    fn test_rejects_non_state_machine() {
        assert!(Arn::parse_state_machine("arn:aws:lambda:us-east-1:123456789012:function:fwd").is_err());
        assert!(Arn::parse_state_machine("arn:aws:states:us-east-1:123456789012:execution:orders:abc").is_err());
        assert!(Arn::parse("not-an-arn").is_err());
        assert!(Arn::parse("arn:aws:states:us-east-1:12345:stateMachine:x").is_err());
    }

    #[test]
    fn test_log_group_name() {
        let arn = Arn::parse("arn:aws:logs:us-east-1:123456789012:log-group:/aws/vendedlogs/states/orders-Logs:*").unwrap();
        assert_eq!(arn.log_group_name(), Some("/aws/vendedlogs/states/orders-Logs"));

        let arn = Arn::parse("arn:aws:logs:us-east-1:123456789012:log-group:plain").unwrap();
        assert_eq!(arn.log_group_name(), Some("plain"));
    }

    #[test]
    fn test_role_name_uses_last_segment() {
        let arn = Arn::parse("arn:aws:iam::123456789012:role/service-role/StepFunctions-orders").unwrap();
        assert_eq!(arn.role_name(), Some("StepFunctions-orders"));

        let arn = Arn::parse("arn:aws:iam::123456789012:role/plain-role").unwrap();
        assert_eq!(arn.role_name(), Some("plain-role"));
    }

    #[test]
    fn test_derived_arns_keep_partition() {
        let (arn, _) = Arn::parse_state_machine("arn:aws-cn:states:cn-north-1:123456789012:stateMachine:o").unwrap();
        assert_eq!(
            arn.customer_policy("P"),
            "arn:aws-cn:iam::123456789012:policy/P"
        );
        assert_eq!(
            arn.log_group_destination("g"),
            "arn:aws-cn:logs:cn-north-1:123456789012:log-group:g:*"
        );
    }
}
