//! Resource observer for assembling the current state of a state machine.
//!
//! The observer issues the read operations of the remote API and folds the
//! answers into a single [`ResourceState`] snapshot. It is called right
//! before planning so the snapshot is never stale relative to execution.

use tracing::{debug, info, warn};

use crate::error::RemoteResult;
use crate::planner::DesiredIntent;

use super::api::RemoteResourceApi;
use super::arn::Arn;
use super::types::ResourceState;

/// Observer reading the current state of state machines.
pub struct ResourceObserver<'a, A: RemoteResourceApi + ?Sized> {
    /// Remote API.
    api: &'a A,
}

impl<'a, A: RemoteResourceApi + ?Sized> ResourceObserver<'a, A> {
    /// Creates a new observer.
    #[must_use]
    pub const fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Fetches the current state of the state machine targeted by `intent`.
    ///
    /// Subscriptions are read from the current logging destination and from
    /// the log group the intent targets; when a filter name appears in both,
    /// the targeted group wins.
    ///
    /// # Errors
    ///
    /// Returns the first remote error encountered.
    pub async fn observe(&self, intent: &DesiredIntent) -> RemoteResult<ResourceState> {
        let arn = intent.resource_arn.as_str();
        info!(resource = %arn, "Observing state machine");

        let description = self.api.describe_resource(arn).await?;
        let current_group = description
            .logging
            .destination
            .as_deref()
            .and_then(|d| Arn::parse(d).ok())
            .and_then(|d| d.log_group_name().map(String::from));

        let mut state = ResourceState::from_description(description);
        state.tags = self.api.list_tags(arn).await?;

        match Arn::parse(&state.role_arn).ok().as_ref().and_then(Arn::role_name) {
            Some(role_name) => {
                state.attached_policies = self.api.list_attached_policies(role_name).await?;
            }
            None => warn!(role = %state.role_arn, "Cannot derive role name, skipping attached policies"),
        }

        if self.api.policy_exists(&intent.policy.arn).await? {
            state.existing_policies.insert(intent.policy.name.clone());
        }

        let target_group = intent.subscription_log_group();
        let mut groups: Vec<String> = current_group.into_iter().collect();
        if let Some(target) = target_group
            && !groups.contains(&target)
        {
            groups.push(target);
        }

        for group in &groups {
            for subscription in self.api.list_subscriptions(group).await? {
                state
                    .subscriptions
                    .insert(subscription.filter_name.clone(), subscription);
            }
        }

        debug!(
            resource = %arn,
            logging = %state.logging,
            tags = state.tags.len(),
            attached_policies = state.attached_policies.len(),
            subscriptions = state.subscriptions.len(),
            "Observed state"
        );

        Ok(state)
    }
}
