//! Remote operations and their compensations.
//!
//! Every operation carries what it needs to run forward and what it needs to
//! undo itself, so the executor never has to re-read remote state to roll
//! back.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::RemoteResult;
use crate::remote::{LoggingConfig, PolicyCreation, RemoteResourceApi};

/// A single remote change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Replace the logging configuration (enable, retarget or disable).
    EnableLogging {
        /// State machine ARN.
        resource_arn: String,
        /// Configuration to apply.
        target: LoggingConfig,
        /// Configuration to restore on undo.
        previous: LoggingConfig,
    },
    /// Create the logs delivery access policy.
    CreatePolicy {
        /// Policy name.
        name: String,
        /// Policy ARN, used for deletion on undo.
        arn: String,
        /// Policy document.
        document: String,
    },
    /// Attach the access policy to the execution role.
    AttachPolicy {
        /// Execution role name.
        role_name: String,
        /// Policy name.
        policy_name: String,
        /// Policy ARN.
        policy_arn: String,
    },
    /// Put the forwarder subscription filter on the log group.
    Subscribe {
        /// Log group name.
        log_group: String,
        /// Filter name.
        filter_name: String,
        /// Forwarder ARN.
        forwarder_arn: String,
        /// Forwarder the same filter pointed at before, to restore on undo.
        previous_forwarder: Option<String>,
    },
    /// Delete the forwarder subscription filter.
    Unsubscribe {
        /// Log group name.
        log_group: String,
        /// Filter name.
        filter_name: String,
        /// Forwarder being removed, to restore on undo.
        forwarder_arn: String,
    },
    /// Add or overwrite tags.
    TagResource {
        /// State machine ARN.
        resource_arn: String,
        /// Tags to set.
        tags: BTreeMap<String, String>,
        /// Previous value of every touched key (`None` if the key was new).
        previous: BTreeMap<String, Option<String>>,
    },
    /// Remove managed tags.
    UntagResource {
        /// State machine ARN.
        resource_arn: String,
        /// Removed keys and their values, to restore on undo.
        removed: BTreeMap<String, String>,
    },
}

/// What a forward call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEffect {
    /// The remote state was changed.
    Changed,
    /// The object already existed; nothing was changed and nothing must be
    /// undone.
    AlreadyPresent,
}

impl Operation {
    /// Short name of the operation kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EnableLogging { .. } => "enable_logging",
            Self::CreatePolicy { .. } => "create_policy",
            Self::AttachPolicy { .. } => "attach_policy",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::TagResource { .. } => "tag_resource",
            Self::UntagResource { .. } => "untag_resource",
        }
    }

    /// Runs the operation forward.
    ///
    /// # Errors
    ///
    /// Returns the remote error of the underlying call.
    pub async fn apply<A>(&self, api: &A) -> RemoteResult<ForwardEffect>
    where
        A: RemoteResourceApi + ?Sized,
    {
        match self {
            Self::EnableLogging { resource_arn, target, .. } => {
                api.update_logging_config(resource_arn, target).await?;
            }
            Self::CreatePolicy { name, document, .. } => {
                if api.create_policy(name, document).await? == PolicyCreation::AlreadyExists {
                    return Ok(ForwardEffect::AlreadyPresent);
                }
            }
            Self::AttachPolicy { role_name, policy_arn, .. } => {
                api.attach_policy(role_name, policy_arn).await?;
            }
            Self::Subscribe { log_group, filter_name, forwarder_arn, .. } => {
                api.put_subscription(log_group, filter_name, forwarder_arn).await?;
            }
            Self::Unsubscribe { log_group, filter_name, .. } => {
                api.delete_subscription(log_group, filter_name).await?;
            }
            Self::TagResource { resource_arn, tags, .. } => {
                api.tag_resource(resource_arn, tags).await?;
            }
            Self::UntagResource { resource_arn, removed } => {
                let keys: Vec<String> = removed.keys().cloned().collect();
                api.untag_resource(resource_arn, &keys).await?;
            }
        }
        Ok(ForwardEffect::Changed)
    }

    /// Compensates a previously applied forward call.
    ///
    /// # Errors
    ///
    /// Returns the first remote error of the compensating calls.
    pub async fn revert<A>(&self, api: &A) -> RemoteResult<()>
    where
        A: RemoteResourceApi + ?Sized,
    {
        match self {
            Self::EnableLogging { resource_arn, previous, .. } => {
                api.update_logging_config(resource_arn, previous).await
            }
            Self::CreatePolicy { arn, .. } => api.delete_policy(arn).await,
            Self::AttachPolicy { role_name, policy_arn, .. } => {
                api.detach_policy(role_name, policy_arn).await
            }
            Self::Subscribe { log_group, filter_name, previous_forwarder, .. } => match previous_forwarder {
                Some(previous) => api.put_subscription(log_group, filter_name, previous).await,
                None => api.delete_subscription(log_group, filter_name).await,
            },
            Self::Unsubscribe { log_group, filter_name, forwarder_arn } => {
                api.put_subscription(log_group, filter_name, forwarder_arn).await
            }
            Self::TagResource { resource_arn, previous, .. } => {
                let restore: BTreeMap<String, String> = previous
                    .iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
                    .collect();
                let added: Vec<String> = previous
                    .iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(k, _)| k.clone())
                    .collect();

                if !restore.is_empty() {
                    api.tag_resource(resource_arn, &restore).await?;
                }
                if !added.is_empty() {
                    api.untag_resource(resource_arn, &added).await?;
                }
                Ok(())
            }
            Self::UntagResource { resource_arn, removed } => api.tag_resource(resource_arn, removed).await,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnableLogging { target, previous, .. } => {
                write!(f, "update logging: {previous} => {target}")
            }
            Self::CreatePolicy { name, .. } => write!(f, "create policy {name}"),
            Self::AttachPolicy { role_name, policy_name, .. } => {
                write!(f, "attach policy {policy_name} to role {role_name}")
            }
            Self::Subscribe { log_group, filter_name, forwarder_arn, previous_forwarder } => {
                write!(f, "subscribe {forwarder_arn} to {log_group} as {filter_name}")?;
                if let Some(previous) = previous_forwarder {
                    write!(f, " (replacing {previous})")?;
                }
                Ok(())
            }
            Self::Unsubscribe { log_group, filter_name, .. } => {
                write!(f, "remove subscription {filter_name} from {log_group}")
            }
            Self::TagResource { tags, .. } => {
                let pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "tag {}", pairs.join(", "))
            }
            Self::UntagResource { removed, .. } => {
                let keys: Vec<&str> = removed.keys().map(String::as_str).collect();
                write!(f, "untag {}", keys.join(", "))
            }
        }
    }
}
