//! The remote resource API consumed by the reconciler.
//!
//! Every read and write the reconciler performs goes through this trait.
//! Implementations map provider errors into [`RemoteError`] kinds and never
//! retry on their own behalf unless documented.
//!
//! [`RemoteError`]: crate::error::RemoteError

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::error::RemoteResult;

use super::types::{LoggingConfig, PolicyCreation, ResourceDescription, Subscription};

/// Operations exposed by the cloud provider for one state machine and the
/// IAM and CloudWatch Logs resources around it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteResourceApi: Send + Sync {
    /// Describes the state machine.
    async fn describe_resource(&self, arn: &str) -> RemoteResult<ResourceDescription>;

    /// Lists the state machine's tags.
    async fn list_tags(&self, arn: &str) -> RemoteResult<BTreeMap<String, String>>;

    /// Lists subscription filters of a log group.
    ///
    /// A log group that does not exist yet has no subscriptions.
    async fn list_subscriptions(&self, log_group: &str) -> RemoteResult<Vec<Subscription>>;

    /// Lists names of managed policies attached to a role.
    async fn list_attached_policies(&self, role_name: &str) -> RemoteResult<BTreeSet<String>>;

    /// Checks whether a customer-managed policy exists.
    async fn policy_exists(&self, policy_arn: &str) -> RemoteResult<bool>;

    /// Replaces the logging configuration of the state machine.
    async fn update_logging_config(&self, arn: &str, config: &LoggingConfig) -> RemoteResult<()>;

    /// Creates a customer-managed policy; a name collision is not an error.
    async fn create_policy(&self, name: &str, document: &str) -> RemoteResult<PolicyCreation>;

    /// Deletes a customer-managed policy.
    async fn delete_policy(&self, policy_arn: &str) -> RemoteResult<()>;

    /// Attaches a managed policy to a role.
    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> RemoteResult<()>;

    /// Detaches a managed policy from a role.
    async fn detach_policy(&self, role_name: &str, policy_arn: &str) -> RemoteResult<()>;

    /// Creates or replaces a subscription filter.
    async fn put_subscription(
        &self,
        log_group: &str,
        filter_name: &str,
        forwarder_arn: &str,
    ) -> RemoteResult<()>;

    /// Deletes a subscription filter.
    async fn delete_subscription(&self, log_group: &str, filter_name: &str) -> RemoteResult<()>;

    /// Adds or overwrites tags on the state machine.
    async fn tag_resource(&self, arn: &str, tags: &BTreeMap<String, String>) -> RemoteResult<()>;

    /// Removes tag keys from the state machine.
    async fn untag_resource(&self, arn: &str, keys: &[String]) -> RemoteResult<()>;
}
