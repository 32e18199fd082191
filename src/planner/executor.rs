//! Plan executor with compensating rollback.
//!
//! Operations run strictly in plan order, one remote call at a time. The
//! first failure (including caller cancellation) stops forward progress and
//! every operation confirmed applied is undone in reverse order. Undo is
//! best effort: a failed undo is recorded and the loop moves on.

use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RemoteError;
use crate::remote::RemoteResourceApi;

use super::operation::{ForwardEffect, Operation};
use super::plan::Plan;

/// Executor for plans.
pub struct PlanExecutor<'a, A: RemoteResourceApi + ?Sized> {
    /// Remote API.
    api: &'a A,
}

/// Forward status of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// The operation changed remote state.
    Applied,
    /// The object already existed; nothing to undo.
    AlreadyPresent,
    /// The operation failed; execution stopped here.
    Failed {
        /// Why it failed.
        error: RemoteError,
    },
    /// An earlier operation failed before this one ran.
    NotAttempted,
}

/// Undo status of one applied operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UndoStatus {
    /// The operation was compensated.
    Reverted,
    /// The compensation failed; the change is still in place.
    UndoFailed {
        /// Why the undo failed.
        error: RemoteError,
    },
}

/// Report for one operation of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Position in the plan.
    pub index: usize,
    /// The operation.
    pub operation: Operation,
    /// Forward status.
    pub status: StepStatus,
    /// Undo status, set only for applied operations of a failed run.
    pub undo: Option<UndoStatus>,
}

/// Overall outcome of executing a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Every operation succeeded.
    Success,
    /// An operation failed and every applied operation was reverted.
    RolledBack,
    /// An operation failed and at least one undo failed.
    RollbackIncomplete,
}

/// Result of executing a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Per-operation reports in plan order.
    pub steps: Vec<StepReport>,
    /// Overall outcome.
    pub outcome: ExecutionOutcome,
}

impl<'a, A: RemoteResourceApi + ?Sized> PlanExecutor<'a, A> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Executes a plan.
    ///
    /// Never returns an error: failures, cancellation and undo failures are
    /// reported in the [`ExecutionResult`].
    pub async fn execute(&self, plan: &Plan, cancel: &CancellationToken) -> ExecutionResult {
        if plan.is_empty() {
            debug!("Nothing to execute");
            return ExecutionResult::empty();
        }

        info!("Executing plan with {} operations", plan.len());

        let mut steps: Vec<StepReport> = Vec::with_capacity(plan.len());
        let mut applied: Vec<usize> = Vec::new();
        let mut failed = false;

        for (index, operation) in plan.iter().enumerate() {
            if failed {
                steps.push(StepReport::new(index, operation, StepStatus::NotAttempted));
                continue;
            }

            info!(index, operation = %operation, "Applying");
            // An in-flight call always completes so its effect is known;
            // cancellation takes hold before the next one starts.
            let result = if cancel.is_cancelled() {
                Err(RemoteError::Cancelled)
            } else {
                operation.apply(self.api).await
            };

            let status = match result {
                Ok(ForwardEffect::Changed) => {
                    applied.push(index);
                    StepStatus::Applied
                }
                Ok(ForwardEffect::AlreadyPresent) => {
                    debug!(index, "Already present, nothing to undo");
                    StepStatus::AlreadyPresent
                }
                Err(err) => {
                    warn!(index, operation = %operation, error = %err, "Operation failed");
                    failed = true;
                    StepStatus::Failed { error: err }
                }
            };
            steps.push(StepReport::new(index, operation, status));
        }

        if !failed {
            info!("Plan applied successfully");
            return ExecutionResult {
                steps,
                outcome: ExecutionOutcome::Success,
            };
        }

        warn!("Rolling back {} applied operations", applied.len());
        let mut clean = true;

        for &index in applied.iter().rev() {
            let step = &mut steps[index];
            let undo = match step.operation.revert(self.api).await {
                Ok(()) => {
                    info!(index, operation = %step.operation, "Reverted");
                    UndoStatus::Reverted
                }
                Err(err) => {
                    error!(index, operation = %step.operation, error = %err, "Undo failed");
                    clean = false;
                    UndoStatus::UndoFailed { error: err }
                }
            };
            step.undo = Some(undo);
        }

        let outcome = if clean {
            ExecutionOutcome::RolledBack
        } else {
            ExecutionOutcome::RollbackIncomplete
        };

        ExecutionResult { steps, outcome }
    }
}

impl StepReport {
    fn new(index: usize, operation: &Operation, status: StepStatus) -> Self {
        Self {
            index,
            operation: operation.clone(),
            status,
            undo: None,
        }
    }
}

impl ExecutionResult {
    /// Result of an empty plan.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            steps: Vec::new(),
            outcome: ExecutionOutcome::Success,
        }
    }

    /// Returns true if the plan had nothing to do.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns true if every operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Success
    }

    /// Operations that changed remote state during the forward pass.
    #[must_use]
    pub fn applied(&self) -> Vec<&Operation> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Applied)
            .map(|s| &s.operation)
            .collect()
    }

    /// The operation that stopped execution and its error.
    #[must_use]
    pub fn forward_failure(&self) -> Option<(&Operation, &RemoteError)> {
        self.steps.iter().find_map(|s| match &s.status {
            StepStatus::Failed { error } => Some((&s.operation, error)),
            _ => None,
        })
    }

    /// Operations whose undo failed, with the undo error.
    #[must_use]
    pub fn undo_failures(&self) -> Vec<(&Operation, &RemoteError)> {
        self.steps
            .iter()
            .filter_map(|s| match &s.undo {
                Some(UndoStatus::UndoFailed { error }) => Some((&s.operation, error)),
                _ => None,
            })
            .collect()
    }

    /// Operations whose effect is still in place after the run: everything
    /// applied on success, only the failed undos otherwise.
    #[must_use]
    pub fn remaining_applied(&self) -> Vec<&Operation> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Applied && s.undo != Some(UndoStatus::Reverted))
            .map(|s| &s.operation)
            .collect()
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::RolledBack => "reverted cleanly",
            Self::RollbackIncomplete => "manual cleanup required",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            return write!(f, "no-op");
        }
        write!(f, "{}", self.outcome)?;
        if let Some((op, err)) = self.forward_failure() {
            write!(f, ": {op} failed ({err})")?;
        }
        let remaining = self.remaining_applied();
        if self.outcome == ExecutionOutcome::RollbackIncomplete {
            write!(f, "; still applied: ")?;
            for (i, op) in remaining.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{op}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{DesiredIntent, StateDiffer};
    use crate::remote::fake::{FakeRemote, FORWARDER};
    use crate::remote::{LoggingConfig, MockRemoteResourceApi, ResourceObserver};
    use mockall::Sequence;
    use std::collections::BTreeMap;

    async fn plan_for(fake: &FakeRemote, intent: &DesiredIntent) -> Plan {
        let state = ResourceObserver::new(fake).observe(intent).await.unwrap();
        Plan::build(StateDiffer::new().diff(&state, intent))
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_plan_is_noop_success() {
        let fake = FakeRemote::new();
        let result = PlanExecutor::new(&fake)
            .execute(&Plan::build(Vec::new()), &CancellationToken::new())
            .await;

        assert!(result.is_noop());
        assert!(result.is_success());
        assert!(fake.writes().is_empty());
    }

    #[tokio::test]
    async fn test_apply_then_rediff_is_empty() {
        let fake = FakeRemote::new();
        fake.set_tags(&[("env", "dev"), ("legacy", "1"), ("third-party", "x")]);
        let intent = FakeRemote::default_intent()
            .with_tags(tags(&[("env", "prod")]))
            .with_managed_tag_keys([String::from("legacy")]);

        let plan = plan_for(&fake, &intent).await;
        let result = PlanExecutor::new(&fake)
            .execute(&plan, &CancellationToken::new())
            .await;
        assert!(result.is_success(), "{result}");

        let again = plan_for(&fake, &intent).await;
        assert!(again.is_empty(), "{again}");
        assert_eq!(fake.tags(), tags(&[("env", "prod"), ("third-party", "x")]));
    }

    #[tokio::test]
    async fn test_subscribe_failure_restores_previous_logging() {
        let fake = FakeRemote::new();
        fake.attach(&FakeRemote::default_intent().policy.name);
        let intent = FakeRemote::default_intent();

        let plan = plan_for(&fake, &intent).await;
        let kinds: Vec<&str> = plan.iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec!["enable_logging", "subscribe"]);

        fake.fail_next("put_subscription", RemoteError::PermissionDenied {
            message: String::from("not allowed"),
        });
        let result = PlanExecutor::new(&fake)
            .execute(&plan, &CancellationToken::new())
            .await;

        assert_eq!(result.outcome, ExecutionOutcome::RolledBack);
        assert_eq!(fake.logging(), LoggingConfig::disabled());
        assert_eq!(
            fake.writes(),
            vec!["update_logging_config", "put_subscription", "update_logging_config"]
        );
        assert!(result.remaining_applied().is_empty());
    }

    #[tokio::test]
    async fn test_failure_at_k_undoes_prefix_in_reverse() {
        let fake = FakeRemote::new();
        fake.set_tags(&[("env", "dev")]);
        let intent = FakeRemote::default_intent().with_tags(tags(&[("env", "prod")]));

        let plan = plan_for(&fake, &intent).await;
        let kinds: Vec<&str> = plan.iter().map(Operation::kind).collect();
        assert_eq!(
            kinds,
            vec!["create_policy", "attach_policy", "enable_logging", "subscribe", "tag_resource"]
        );

        fake.fail_next("tag_resource", RemoteError::transient("Rate exceeded"));
        let result = PlanExecutor::new(&fake)
            .execute(&plan, &CancellationToken::new())
            .await;

        assert_eq!(result.outcome, ExecutionOutcome::RolledBack);
        assert_eq!(
            fake.writes(),
            vec![
                "create_policy",
                "attach_policy",
                "update_logging_config",
                "put_subscription",
                "tag_resource",
                "delete_subscription",
                "update_logging_config",
                "detach_policy",
                "delete_policy",
            ]
        );
        assert!(fake.attached().is_empty());
        assert!(!fake.has_policy(&intent.policy.name));
        assert_eq!(fake.logging(), LoggingConfig::disabled());
        assert_eq!(fake.tags(), tags(&[("env", "dev")]));
    }

    #[tokio::test]
    async fn test_undo_failure_is_recorded_and_loop_continues() {
        let fake = FakeRemote::new();
        let intent = FakeRemote::default_intent();
        let plan = plan_for(&fake, &intent).await;

        fake.fail_next("put_subscription", RemoteError::transient("timeout"));
        fake.fail_next("detach_policy", RemoteError::PermissionDenied {
            message: String::from("no"),
        });
        let result = PlanExecutor::new(&fake)
            .execute(&plan, &CancellationToken::new())
            .await;

        assert_eq!(result.outcome, ExecutionOutcome::RollbackIncomplete);
        let undo_failed: Vec<&str> = result.undo_failures().iter().map(|(op, _)| op.kind()).collect();
        assert_eq!(undo_failed, vec!["attach_policy"]);
        let remaining: Vec<&str> = result.remaining_applied().iter().map(|op| op.kind()).collect();
        assert_eq!(remaining, vec!["attach_policy"]);

        // The policy deletion still ran after the failed detach.
        assert_eq!(fake.writes().last().map(String::as_str), Some("delete_policy"));
        assert!(result.to_string().contains("manual cleanup required"));
    }

    #[tokio::test]
    async fn test_already_present_policy_is_not_undone() {
        let fake = FakeRemote::new();
        let intent = FakeRemote::default_intent();
        let plan = plan_for(&fake, &intent).await;

        // Another process creates the policy between observe and apply.
        fake.create_existing_policy(&intent.policy.name);
        fake.fail_next("put_subscription", RemoteError::transient("timeout"));

        let result = PlanExecutor::new(&fake)
            .execute(&plan, &CancellationToken::new())
            .await;

        assert_eq!(result.outcome, ExecutionOutcome::RolledBack);
        assert_eq!(result.steps[0].status, StepStatus::AlreadyPresent);
        assert!(result.steps[0].undo.is_none());
        assert!(fake.has_policy(&intent.policy.name));
        assert!(!fake.writes().contains(&String::from("delete_policy")));
    }

    #[tokio::test]
    async fn test_cancellation_is_a_forward_failure() {
        let fake = FakeRemote::new();
        let intent = FakeRemote::default_intent();
        let plan = plan_for(&fake, &intent).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = PlanExecutor::new(&fake).execute(&plan, &cancel).await;

        assert_eq!(result.outcome, ExecutionOutcome::RolledBack);
        assert_eq!(result.forward_failure().map(|(_, e)| e), Some(&RemoteError::Cancelled));
        assert!(result.steps[1..].iter().all(|s| s.status == StepStatus::NotAttempted));
        assert!(fake.writes().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_call_keeps_that_call_undoable() {
        let fake = FakeRemote::new();
        fake.attach(&FakeRemote::default_intent().policy.name);
        let intent = FakeRemote::default_intent();
        let plan = plan_for(&fake, &intent).await;

        let cancel = CancellationToken::new();
        fake.cancel_during("update_logging_config", cancel.clone());
        let result = PlanExecutor::new(&fake).execute(&plan, &cancel).await;

        assert_eq!(result.outcome, ExecutionOutcome::RolledBack);
        assert_eq!(result.steps[0].status, StepStatus::Applied);
        assert_eq!(result.steps[0].undo, Some(UndoStatus::Reverted));
        assert_eq!(
            result.steps[1].status,
            StepStatus::Failed { error: RemoteError::Cancelled }
        );
        assert_eq!(fake.logging(), LoggingConfig::disabled());
        assert_eq!(
            fake.writes(),
            vec!["update_logging_config", "update_logging_config"]
        );
        assert!(result.remaining_applied().is_empty());
    }

    #[tokio::test]
    async fn test_successful_run_leaves_filter_in_place() {
        let fake = FakeRemote::new();
        let intent = FakeRemote::default_intent();
        let plan = plan_for(&fake, &intent).await;

        let result = PlanExecutor::new(&fake)
            .execute(&plan, &CancellationToken::new())
            .await;

        assert!(result.is_success());
        let group = intent.subscription_log_group().unwrap();
        assert_eq!(
            fake.subscription(&group, &intent.subscription_filter).as_deref(),
            Some(FORWARDER)
        );
    }

    #[tokio::test]
    async fn test_moving_log_group_moves_the_filter() {
        let fake = FakeRemote::new();
        let intent = FakeRemote::default_intent();
        let old_group = "/aws/vendedlogs/states/orders-old";
        fake.attach(&intent.policy.name);
        fake.set_logging(LoggingConfig::enabled(
            intent.logging.level,
            intent.logging.include_execution_data,
            format!("arn:aws:logs:us-east-1:123456789012:log-group:{old_group}:*"),
        ));
        fake.add_subscription(old_group, &intent.subscription_filter, FORWARDER);

        let plan = plan_for(&fake, &intent).await;
        let result = PlanExecutor::new(&fake)
            .execute(&plan, &CancellationToken::new())
            .await;
        assert!(result.is_success(), "{result}");

        let new_group = intent.subscription_log_group().unwrap();
        assert!(fake.subscription(old_group, &intent.subscription_filter).is_none());
        assert_eq!(
            fake.subscription(&new_group, &intent.subscription_filter).as_deref(),
            Some(FORWARDER)
        );
        assert!(plan_for(&fake, &intent).await.is_empty());
    }

    #[tokio::test]
    async fn test_undo_runs_in_strict_reverse_order() {
        let mut api = MockRemoteResourceApi::new();
        let mut seq = Sequence::new();

        api.expect_update_logging_config()
            .withf(|_, config| config.is_enabled())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        api.expect_put_subscription()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        api.expect_tag_resource()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(RemoteError::transient("throttled")));
        api.expect_delete_subscription()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        api.expect_update_logging_config()
            .withf(|_, config| !config.is_enabled())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let intent = FakeRemote::default_intent();
        let plan = Plan::build(vec![
            Operation::TagResource {
                resource_arn: intent.resource_arn.clone(),
                tags: tags(&[("env", "prod")]),
                previous: BTreeMap::from([(String::from("env"), None)]),
            },
            Operation::Subscribe {
                log_group: intent.subscription_log_group().unwrap(),
                filter_name: intent.subscription_filter.clone(),
                forwarder_arn: FORWARDER.to_string(),
                previous_forwarder: None,
            },
            Operation::EnableLogging {
                resource_arn: intent.resource_arn.clone(),
                target: intent.logging.clone(),
                previous: LoggingConfig::disabled(),
            },
        ]);

        let result = PlanExecutor::new(&api)
            .execute(&plan, &CancellationToken::new())
            .await;
        assert_eq!(result.outcome, ExecutionOutcome::RolledBack);
    }
}
