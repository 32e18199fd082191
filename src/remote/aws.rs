//! AWS-backed implementation of the remote resource API.
//!
//! Uses the Step Functions, IAM and CloudWatch Logs SDK clients and maps
//! their responses into the crate's value objects. Provider errors are
//! classified by error code rather than by message text.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::Client as LogsClient;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_sfn::Client as SfnClient;
use aws_sdk_sfn::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sfn::types::{CloudWatchLogsLogGroup, LogDestination, LogLevel as SfnLogLevel, LoggingConfiguration, Tag};
use tracing::{debug, info};

use crate::error::{RemoteError, RemoteResult};

use super::api::RemoteResourceApi;
use super::arn::Arn;
use super::types::{LogLevel, LoggingConfig, PolicyCreation, ResourceDescription, Subscription};

/// Error codes meaning the target does not exist.
const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchEntity",
    "ResourceNotFoundException",
    "StateMachineDoesNotExist",
    "StateMachineDeleting",
];

/// Error codes meaning the request collides with existing state.
const CONFLICT_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "ResourceAlreadyExistsException",
    "ConflictException",
    "DeleteConflict",
];

/// Error codes for throttling and service-side transient failures.
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "ServiceFailure",
    "OperationAbortedException",
];

/// Error codes for missing permissions.
const PERMISSION_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "UnrecognizedClientException",
];

/// Remote resource API backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsResourceApi {
    /// Step Functions client.
    sfn: SfnClient,
    /// IAM client.
    iam: IamClient,
    /// CloudWatch Logs client.
    logs: LogsClient,
}

impl AwsResourceApi {
    /// Creates clients from the default credential chain, optionally pinning
    /// the region.
    pub async fn new(region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::from_config(&config)
    }

    /// Creates clients from an already-loaded SDK configuration.
    #[must_use]
    pub fn from_config(config: &aws_config::SdkConfig) -> Self {
        Self {
            sfn: SfnClient::new(config),
            iam: IamClient::new(config),
            logs: LogsClient::new(config),
        }
    }

    /// Creates the destination log group if it does not exist yet.
    async fn ensure_log_group(&self, log_group: &str) -> RemoteResult<()> {
        match self.logs.create_log_group().log_group_name(log_group).send().await {
            Ok(_) => {
                info!(log_group = %log_group, "Created log group");
                Ok(())
            }
            Err(err) => match classify_sdk_error(&err) {
                RemoteError::Conflict { .. } => {
                    debug!(log_group = %log_group, "Log group already exists");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }
}

/// Classifies an SDK error into a [`RemoteError`] kind.
fn classify_sdk_error<E, R>(err: &SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            RemoteError::transient(DisplayErrorContext(err).to_string())
        }
        _ => {
            let message = err
                .message()
                .map_or_else(|| DisplayErrorContext(err).to_string(), String::from);
            classify_code(err.code(), message)
        }
    }
}

/// Maps an AWS error code to a [`RemoteError`] kind.
fn classify_code(code: Option<&str>, message: String) -> RemoteError {
    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => RemoteError::NotFound { resource: message },
        Some(c) if CONFLICT_CODES.contains(&c) => RemoteError::Conflict { message },
        Some(c) if TRANSIENT_CODES.contains(&c) => RemoteError::Transient { message },
        Some(c) if PERMISSION_CODES.contains(&c) => RemoteError::PermissionDenied { message },
        _ => RemoteError::Unexpected {
            code: code.map(String::from),
            message,
        },
    }
}

/// Maps the SDK logging configuration into the crate's value object.
fn logging_from_sdk(config: Option<&LoggingConfiguration>) -> LoggingConfig {
    let Some(config) = config else {
        return LoggingConfig::disabled();
    };

    let level = match config.level() {
        Some(SfnLogLevel::All) => LogLevel::All,
        Some(SfnLogLevel::Error) => LogLevel::Error,
        Some(SfnLogLevel::Fatal) => LogLevel::Fatal,
        _ => LogLevel::Off,
    };

    let destination = config
        .destinations()
        .iter()
        .filter_map(LogDestination::cloud_watch_logs_log_group)
        .find_map(CloudWatchLogsLogGroup::log_group_arn)
        .map(String::from);

    LoggingConfig {
        level,
        include_execution_data: config.include_execution_data(),
        destination,
    }
}

/// Maps the crate's logging configuration into the SDK request shape.
fn logging_to_sdk(config: &LoggingConfig) -> LoggingConfiguration {
    let level = match config.level {
        LogLevel::All => SfnLogLevel::All,
        LogLevel::Error => SfnLogLevel::Error,
        LogLevel::Fatal => SfnLogLevel::Fatal,
        LogLevel::Off => SfnLogLevel::Off,
    };

    let mut builder = LoggingConfiguration::builder()
        .level(level)
        .include_execution_data(config.include_execution_data);

    if let Some(destination) = &config.destination {
        builder = builder.destinations(
            LogDestination::builder()
                .cloud_watch_logs_log_group(
                    CloudWatchLogsLogGroup::builder()
                        .log_group_arn(destination)
                        .build(),
                )
                .build(),
        );
    }

    builder.build()
}

#[async_trait]
impl RemoteResourceApi for AwsResourceApi {
    async fn describe_resource(&self, arn: &str) -> RemoteResult<ResourceDescription> {
        let output = self
            .sfn
            .describe_state_machine()
            .state_machine_arn(arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;

        Ok(ResourceDescription {
            arn: output.state_machine_arn().to_string(),
            name: output.name().to_string(),
            role_arn: output.role_arn().to_string(),
            logging: logging_from_sdk(output.logging_configuration()),
        })
    }

    async fn list_tags(&self, arn: &str) -> RemoteResult<BTreeMap<String, String>> {
        let output = self
            .sfn
            .list_tags_for_resource()
            .resource_arn(arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;

        Ok(output
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
            .collect())
    }

    async fn list_subscriptions(&self, log_group: &str) -> RemoteResult<Vec<Subscription>> {
        let output = match self
            .logs
            .describe_subscription_filters()
            .log_group_name(log_group)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                return match classify_sdk_error(&err) {
                    RemoteError::NotFound { .. } => {
                        debug!(log_group = %log_group, "Log group does not exist yet");
                        Ok(Vec::new())
                    }
                    other => Err(other),
                };
            }
        };

        Ok(output
            .subscription_filters()
            .iter()
            .filter_map(|f| {
                Some(Subscription {
                    log_group: log_group.to_string(),
                    filter_name: f.filter_name()?.to_string(),
                    forwarder_arn: f.destination_arn()?.to_string(),
                })
            })
            .collect())
    }

    async fn list_attached_policies(&self, role_name: &str) -> RemoteResult<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .iam
                .list_attached_role_policies()
                .role_name(role_name)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e))?;

            names.extend(
                output
                    .attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_name().map(String::from)),
            );

            match output.marker() {
                Some(next) if output.is_truncated() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(names)
    }

    async fn policy_exists(&self, policy_arn: &str) -> RemoteResult<bool> {
        match self.iam.get_policy().policy_arn(policy_arn).send().await {
            Ok(_) => Ok(true),
            Err(err) => match classify_sdk_error(&err) {
                RemoteError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn update_logging_config(&self, arn: &str, config: &LoggingConfig) -> RemoteResult<()> {
        if let Some(group) = config
            .destination
            .as_deref()
            .and_then(|d| Arn::parse(d).ok())
            .and_then(|d| d.log_group_name().map(String::from))
        {
            self.ensure_log_group(&group).await?;
        }

        self.sfn
            .update_state_machine()
            .state_machine_arn(arn)
            .logging_configuration(logging_to_sdk(config))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;

        Ok(())
    }

    async fn create_policy(&self, name: &str, document: &str) -> RemoteResult<PolicyCreation> {
        match self
            .iam
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
        {
            Ok(_) => Ok(PolicyCreation::Created),
            Err(err) => match classify_sdk_error(&err) {
                RemoteError::Conflict { .. } => Ok(PolicyCreation::AlreadyExists),
                other => Err(other),
            },
        }
    }

    async fn delete_policy(&self, policy_arn: &str) -> RemoteResult<()> {
        self.iam
            .delete_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;
        Ok(())
    }

    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> RemoteResult<()> {
        self.iam
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;
        Ok(())
    }

    async fn detach_policy(&self, role_name: &str, policy_arn: &str) -> RemoteResult<()> {
        self.iam
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;
        Ok(())
    }

    async fn put_subscription(
        &self,
        log_group: &str,
        filter_name: &str,
        forwarder_arn: &str,
    ) -> RemoteResult<()> {
        self.logs
            .put_subscription_filter()
            .log_group_name(log_group)
            .filter_name(filter_name)
            .filter_pattern("")
            .destination_arn(forwarder_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;
        Ok(())
    }

    async fn delete_subscription(&self, log_group: &str, filter_name: &str) -> RemoteResult<()> {
        self.logs
            .delete_subscription_filter()
            .log_group_name(log_group)
            .filter_name(filter_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;
        Ok(())
    }

    async fn tag_resource(&self, arn: &str, tags: &BTreeMap<String, String>) -> RemoteResult<()> {
        let tags: Vec<Tag> = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();

        self.sfn
            .tag_resource()
            .resource_arn(arn)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;
        Ok(())
    }

    async fn untag_resource(&self, arn: &str, keys: &[String]) -> RemoteResult<()> {
        self.sfn
            .untag_resource()
            .resource_arn(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;
        Ok(())
    }
}
