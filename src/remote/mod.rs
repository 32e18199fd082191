//! Remote provider boundary.
//!
//! This module defines the operations the reconciler needs from the cloud
//! provider, the value objects they exchange, and the AWS-backed adapter.

mod api;
mod arn;
mod aws;
mod observer;
mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use api::RemoteResourceApi;
#[cfg(test)]
pub use api::MockRemoteResourceApi;
pub use arn::Arn;
pub use aws::AwsResourceApi;
pub use observer::ResourceObserver;
pub use types::{LogLevel, LoggingConfig, PolicyCreation, ResourceDescription, ResourceState, Subscription};
