//! State differ computing the operations that close the gap between the
//! observed state of a state machine and its desired intent.
//!
//! The differ is pure: no remote calls, no failures. When the observed state
//! already satisfies the intent the result is empty.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::remote::{Arn, ResourceState};

use super::intent::DesiredIntent;
use super::operation::Operation;

/// Unordered, duplicate-free set of operations.
pub type OperationSet = BTreeSet<Operation>;

/// Computes operation sets from observed and desired state.
#[derive(Debug, Default, Clone, Copy)]
pub struct StateDiffer;

impl StateDiffer {
    /// Creates a new differ.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the operations needed to move `current` to `desired`.
    #[must_use]
    pub fn diff(&self, current: &ResourceState, desired: &DesiredIntent) -> OperationSet {
        let mut ops = OperationSet::new();

        Self::diff_logging(current, desired, &mut ops);
        Self::diff_policy(current, desired, &mut ops);
        Self::diff_subscription(current, desired, &mut ops);
        Self::diff_tags(current, desired, &mut ops);

        debug!(resource = %desired.resource_arn, operations = ops.len(), "Computed diff");
        ops
    }

    fn diff_logging(current: &ResourceState, desired: &DesiredIntent, ops: &mut OperationSet) {
        let have = &current.logging;
        let want = &desired.logging;

        let differs = if have.is_enabled() != want.is_enabled() {
            true
        } else if want.is_enabled() {
            have.destination != want.destination
                || have.level != want.level
                || have.include_execution_data != want.include_execution_data
        } else {
            false
        };

        if differs {
            ops.insert(Operation::EnableLogging {
                resource_arn: desired.resource_arn.clone(),
                target: want.clone(),
                previous: have.clone(),
            });
        }
    }

    fn diff_policy(current: &ResourceState, desired: &DesiredIntent, ops: &mut OperationSet) {
        let policy = &desired.policy;
        if current.attached_policies.contains(&policy.name) {
            return;
        }

        let role = Arn::parse(&current.role_arn).ok();
        let Some(role_name) = role.as_ref().and_then(Arn::role_name) else {
            warn!(role = %current.role_arn, "Cannot derive role name, skipping access policy");
            return;
        };

        if !current.existing_policies.contains(&policy.name) {
            ops.insert(Operation::CreatePolicy {
                name: policy.name.clone(),
                arn: policy.arn.clone(),
                document: policy.document.clone(),
            });
        }

        ops.insert(Operation::AttachPolicy {
            role_name: role_name.to_string(),
            policy_name: policy.name.clone(),
            policy_arn: policy.arn.clone(),
        });
    }

    fn diff_subscription(current: &ResourceState, desired: &DesiredIntent, ops: &mut OperationSet) {
        let filter = &desired.subscription_filter;
        let existing = current.subscriptions.get(filter);

        let Some(forwarder) = &desired.forwarder_arn else {
            if let Some(sub) = existing {
                ops.insert(Operation::Unsubscribe {
                    log_group: sub.log_group.clone(),
                    filter_name: sub.filter_name.clone(),
                    forwarder_arn: sub.forwarder_arn.clone(),
                });
            }
            return;
        };

        let Some(group) = desired.subscription_log_group() else {
            warn!(
                resource = %desired.resource_arn,
                "Forwarder configured but no log group to subscribe, skipping subscription"
            );
            return;
        };

        // A filter of ours left on the previous log group stops forwarding
        // once logging moves, so it goes with the move.
        if let Some(stale) = existing.filter(|s| s.log_group != group) {
            ops.insert(Operation::Unsubscribe {
                log_group: stale.log_group.clone(),
                filter_name: stale.filter_name.clone(),
                forwarder_arn: stale.forwarder_arn.clone(),
            });
        }

        let same_group = existing.filter(|s| s.log_group == group);
        if same_group.is_some_and(|s| &s.forwarder_arn == forwarder) {
            return;
        }

        ops.insert(Operation::Subscribe {
            log_group: group,
            filter_name: filter.clone(),
            forwarder_arn: forwarder.clone(),
            previous_forwarder: same_group.map(|s| s.forwarder_arn.clone()),
        });
    }

    fn diff_tags(current: &ResourceState, desired: &DesiredIntent, ops: &mut OperationSet) {
        let mut tags = BTreeMap::new();
        let mut previous = BTreeMap::new();
        for (key, value) in &desired.tags {
            let have = current.tags.get(key);
            if have != Some(value) {
                tags.insert(key.clone(), value.clone());
                previous.insert(key.clone(), have.cloned());
            }
        }

        if !tags.is_empty() {
            ops.insert(Operation::TagResource {
                resource_arn: desired.resource_arn.clone(),
                tags,
                previous,
            });
        }

        let removed: BTreeMap<String, String> = desired
            .managed_tag_keys
            .iter()
            .filter(|key| !desired.tags.contains_key(*key))
            .filter_map(|key| current.tags.get(key).map(|v| (key.clone(), v.clone())))
            .collect();

        if !removed.is_empty() {
            ops.insert(Operation::UntagResource {
                resource_arn: desired.resource_arn.clone(),
                removed,
            });
        }
    }
}
