//! Reconciler driving one state machine to its desired instrumentation.
//!
//! A run holds the resource lease for its whole duration: it loads the
//! ledger record, observes the remote state, diffs, executes the plan with
//! compensating rollback, records the outcome, and releases the lease even
//! when any of those steps fail.

use std::collections::BTreeSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigHasher;
use crate::error::{ReconcileError, Result};
use crate::planner::{
    DesiredIntent, ExecutionOutcome, ExecutionResult, Plan, PlanExecutor, StateDiffer,
};
use crate::remote::{RemoteResourceApi, ResourceObserver, ResourceState};
use crate::state::{generate_holder_id, HistoryEntry, ResourceRecord, RunOutcome, StateStore};

/// Reconciler for instrumenting state machines.
pub struct Reconciler<'a, A: RemoteResourceApi + ?Sized, S: StateStore + ?Sized> {
    /// Remote API.
    api: &'a A,
    /// Ledger store.
    state_store: &'a S,
    /// Lease holder identity.
    holder: String,
    /// Intent hasher.
    hasher: ConfigHasher,
    /// State differ.
    differ: StateDiffer,
}

/// Observed state and the plan that would converge it.
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    /// State machine ARN.
    pub resource_arn: String,
    /// Hash of the intent planned toward.
    pub intent_hash: String,
    /// Hash of the last intent applied successfully, if any.
    pub recorded_hash: Option<String>,
    /// Observed state.
    pub current: ResourceState,
    /// Ordered operations.
    pub plan: Plan,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    /// State machine ARN.
    pub resource_arn: String,
    /// Hash of the intent.
    pub intent_hash: String,
    /// The executed plan.
    pub plan: Plan,
    /// Execution report.
    pub execution: ExecutionResult,
    /// Errors recording the outcome in the ledger.
    pub errors: Vec<String>,
}

/// Report of drift detection for one state machine.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// State machine ARN.
    pub resource_arn: String,
    /// Operations a reconcile would apply, described.
    pub pending: Vec<String>,
    /// Whether the intent differs from the last one applied.
    pub config_changed: bool,
}

impl<'a, A, S> Reconciler<'a, A, S>
where
    A: RemoteResourceApi + ?Sized,
    S: StateStore + ?Sized,
{
    /// Creates a new reconciler with a generated lease holder identity.
    #[must_use]
    pub fn new(api: &'a A, state_store: &'a S) -> Self {
        Self {
            api,
            state_store,
            holder: generate_holder_id(),
            hasher: ConfigHasher::new(),
            differ: StateDiffer::new(),
        }
    }

    /// Sets the lease holder identity.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Observes the resource and builds the plan without executing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or observation fails.
    pub async fn plan(&self, intent: &DesiredIntent) -> Result<PlanPreview> {
        let record = self.state_store.load(&intent.resource_arn).await?;
        let intent = Self::effective_intent(intent, record.as_ref());
        let (current, plan) = self.observe_and_plan(&intent).await?;

        Ok(PlanPreview {
            resource_arn: intent.resource_arn.clone(),
            intent_hash: self.hasher.hash_intent(&intent),
            recorded_hash: record
                .map(|r| r.intent_hash)
                .filter(|h| !h.is_empty()),
            current,
            plan,
        })
    }

    /// Executes a plan with compensating rollback.
    pub async fn apply(&self, plan: &Plan, cancel: &CancellationToken) -> ExecutionResult {
        PlanExecutor::new(self.api).execute(plan, cancel).await
    }

    /// Performs a full reconciliation of one state machine under its lease.
    ///
    /// Execution failures are reported in the result, not as errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease is held by someone else, the ledger
    /// cannot be read, or the current state cannot be observed.
    pub async fn reconcile(
        &self,
        intent: &DesiredIntent,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        let resource = intent.resource_arn.as_str();
        info!(resource = %resource, "Starting reconciliation");

        let lease = self.state_store.acquire_lock(resource, &self.holder).await?;

        let result = self.reconcile_locked(intent, cancel).await;

        if let Err(e) = self.state_store.release_lock(resource, &lease.lock_id).await {
            error!(resource = %resource, "Failed to release lease: {e}");
        }

        result
    }

    async fn reconcile_locked(
        &self,
        intent: &DesiredIntent,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        let mut record = self
            .state_store
            .load(&intent.resource_arn)
            .await?
            .unwrap_or_else(|| ResourceRecord::new(&intent.resource_arn));

        let intent = Self::effective_intent(intent, Some(&record));
        let intent_hash = self.hasher.hash_intent(&intent);

        let (_, plan) = self.observe_and_plan(&intent).await?;

        let execution = if plan.is_empty() {
            info!(resource = %intent.resource_arn, "No changes required - instrumentation is converged");
            ExecutionResult::empty()
        } else {
            self.apply(&plan, cancel).await
        };

        Self::record_outcome(&mut record, &intent, &intent_hash, &plan, &execution);

        let mut errors = Vec::new();
        if let Err(e) = self.state_store.save(&record).await {
            error!(resource = %intent.resource_arn, "Failed to save record: {e}");
            errors.push(format!("Failed to save record: {e}"));
        }

        match execution.outcome {
            ExecutionOutcome::Success => info!(resource = %intent.resource_arn, "Reconciliation successful"),
            ExecutionOutcome::RolledBack => warn!(resource = %intent.resource_arn, "Reconciliation failed and was reverted"),
            ExecutionOutcome::RollbackIncomplete => {
                error!(resource = %intent.resource_arn, "Reconciliation failed; manual cleanup required");
            }
        }

        Ok(ReconciliationResult {
            resource_arn: intent.resource_arn.clone(),
            intent_hash,
            plan,
            execution,
            errors,
        })
    }

    /// Checks for drift without applying changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the drift check fails.
    pub async fn check_drift(&self, intent: &DesiredIntent) -> Result<DriftReport> {
        info!(resource = %intent.resource_arn, "Checking for drift");

        let preview = self.plan(intent).await?;

        Ok(DriftReport {
            resource_arn: preview.resource_arn,
            pending: preview.plan.descriptions(),
            config_changed: preview
                .recorded_hash
                .is_some_and(|h| h != preview.intent_hash),
        })
    }

    /// Adds the tag keys recorded in the ledger to the intent's managed set.
    fn effective_intent(intent: &DesiredIntent, record: Option<&ResourceRecord>) -> DesiredIntent {
        let recorded = record
            .map(|r| r.managed_tag_keys.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        intent.clone().with_managed_tag_keys(recorded)
    }

    async fn observe_and_plan(&self, intent: &DesiredIntent) -> Result<(ResourceState, Plan)> {
        let current = ResourceObserver::new(self.api)
            .observe(intent)
            .await
            .map_err(|source| ReconcileError::ObservationFailed {
                resource: intent.resource_arn.clone(),
                source,
            })?;

        let plan = Plan::build(self.differ.diff(&current, intent));
        debug!(resource = %intent.resource_arn, operations = plan.len(), "Built plan");

        Ok((current, plan))
    }

    fn record_outcome(
        record: &mut ResourceRecord,
        intent: &DesiredIntent,
        intent_hash: &str,
        plan: &Plan,
        execution: &ExecutionResult,
    ) {
        let desired_keys: BTreeSet<String> = intent.tags.keys().cloned().collect();

        let outcome = match execution.outcome {
            ExecutionOutcome::Success => {
                record.managed_tag_keys = desired_keys;
                intent_hash.clone_into(&mut record.intent_hash);
                if execution.is_noop() {
                    RunOutcome::NoChange
                } else {
                    RunOutcome::Applied
                }
            }
            ExecutionOutcome::RolledBack => RunOutcome::RolledBack,
            ExecutionOutcome::RollbackIncomplete => {
                record.managed_tag_keys.extend(desired_keys);
                RunOutcome::RollbackIncomplete
            }
        };

        let remaining = if execution.is_success() {
            Vec::new()
        } else {
            execution
                .remaining_applied()
                .iter()
                .map(ToString::to_string)
                .collect()
        };

        record.add_history(HistoryEntry {
            timestamp: chrono::Utc::now(),
            intent_hash: intent_hash.to_string(),
            operations: plan.descriptions(),
            outcome,
            error: execution
                .forward_failure()
                .map(|(op, err)| format!("{op}: {err}")),
            remaining,
        });
    }
}

impl ReconciliationResult {
    /// Returns true if the plan was applied (or nothing was needed).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.execution.is_success()
    }
}

impl DriftReport {
    /// Returns true if the remote state matches the intent.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            write!(f, "{}: no drift detected", self.resource_arn)?;
        } else {
            writeln!(f, "{}: drift detected:", self.resource_arn)?;
            for op in &self.pending {
                writeln!(f, "  - {op}")?;
            }
        }
        if self.config_changed {
            write!(f, " (configuration changed since last apply)")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}: {}", self.resource_arn, self.execution)?;
        for step in &self.execution.steps {
            writeln!(f, "  {}. {} [{:?}]", step.index + 1, step.operation, step.status)?;
        }
        for error in &self.errors {
            writeln!(f, "  error: {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InstrumentError, RemoteError, StateError};
    use crate::remote::fake::FakeRemote;
    use crate::state::LocalStateStore;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn store() -> (LocalStateStore, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        (LocalStateStore::with_base_dir(dir.path()), dir)
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_reconcile_converges_and_records() {
        let fake = FakeRemote::new();
        let (store, _dir) = store();
        let reconciler = Reconciler::new(&fake, &store);
        let intent = FakeRemote::default_intent().with_tags(tags(&[("env", "prod")]));

        let result = reconciler
            .reconcile(&intent, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.plan.len(), 5);

        let again = reconciler
            .reconcile(&intent, &CancellationToken::new())
            .await
            .unwrap();
        assert!(again.execution.is_noop());

        let record = store.load(&intent.resource_arn).await.unwrap().unwrap();
        assert_eq!(record.managed_tag_keys, BTreeSet::from([String::from("env")]));
        assert_eq!(record.intent_hash, result.intent_hash);
        let outcomes: Vec<RunOutcome> = record.history.iter().map(|h| h.outcome).collect();
        assert_eq!(outcomes, vec![RunOutcome::Applied, RunOutcome::NoChange]);
        assert!(!store.is_locked(&intent.resource_arn).await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_tag_is_removed_on_next_run() {
        let fake = FakeRemote::new();
        fake.set_tags(&[("cost-center", "42")]);
        let (store, _dir) = store();
        let reconciler = Reconciler::new(&fake, &store);

        let first = FakeRemote::default_intent().with_tags(tags(&[("env", "prod"), ("owner", "data")]));
        reconciler.reconcile(&first, &CancellationToken::new()).await.unwrap();

        let second = FakeRemote::default_intent().with_tags(tags(&[("env", "prod")]));
        let result = reconciler.reconcile(&second, &CancellationToken::new()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.plan.len(), 1);
        assert_eq!(fake.tags(), tags(&[("cost-center", "42"), ("env", "prod")]));
    }

    #[tokio::test]
    async fn test_failed_run_is_reverted_and_recorded() {
        let fake = FakeRemote::new();
        let (store, _dir) = store();
        let reconciler = Reconciler::new(&fake, &store);
        let intent = FakeRemote::default_intent().with_tags(tags(&[("env", "prod")]));

        fake.fail_next("put_subscription", RemoteError::transient("Rate exceeded"));
        let result = reconciler
            .reconcile(&intent, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.execution.outcome, ExecutionOutcome::RolledBack);
        let record = store.load(&intent.resource_arn).await.unwrap().unwrap();
        assert!(record.managed_tag_keys.is_empty());
        assert!(record.intent_hash.is_empty());
        let last = record.last_run().unwrap();
        assert_eq!(last.outcome, RunOutcome::RolledBack);
        assert!(last.error.as_deref().unwrap().contains("Rate exceeded"));
        assert!(!store.is_locked(&intent.resource_arn).await.unwrap());
    }

    #[tokio::test]
    async fn test_incomplete_rollback_keeps_desired_keys_managed() {
        let fake = FakeRemote::new();
        let (store, _dir) = store();
        let reconciler = Reconciler::new(&fake, &store);
        let intent = FakeRemote::default_intent().with_tags(tags(&[("env", "prod")]));

        // Tagging runs last, so the subscription is undone first and sticks.
        fake.fail_next("tag_resource", RemoteError::transient("throttled"));
        fake.fail_always("delete_subscription", RemoteError::PermissionDenied {
            message: String::from("denied"),
        });
        let result = reconciler
            .reconcile(&intent, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.execution.outcome, ExecutionOutcome::RollbackIncomplete);
        let record = store.load(&intent.resource_arn).await.unwrap().unwrap();
        assert!(record.managed_tag_keys.contains("env"));
        assert_eq!(record.last_run().unwrap().remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_live_lease_aborts_run() {
        let fake = FakeRemote::new();
        let (store, _dir) = store();
        let intent = FakeRemote::default_intent();
        store.acquire_lock(&intent.resource_arn, "other-process").await.unwrap();

        let err = Reconciler::new(&fake, &store)
            .reconcile(&intent, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InstrumentError::State(StateError::LockedByOther { .. })));
        assert!(fake.writes().is_empty());
        assert!(store.is_locked(&intent.resource_arn).await.unwrap());
    }

    #[tokio::test]
    async fn test_observation_failure_releases_lease() {
        let fake = FakeRemote::new();
        fake.remove_state_machine();
        let (store, _dir) = store();
        let intent = FakeRemote::default_intent();

        let err = Reconciler::new(&fake, &store)
            .reconcile(&intent, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InstrumentError::Reconcile(ReconcileError::ObservationFailed {
                source: RemoteError::NotFound { .. },
                ..
            })
        ));
        assert!(!store.is_locked(&intent.resource_arn).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_drift_does_not_write() {
        let fake = FakeRemote::new();
        let (store, _dir) = store();
        let intent = FakeRemote::default_intent();

        let report = Reconciler::new(&fake, &store)
            .check_drift(&intent)
            .await
            .unwrap();

        assert!(!report.is_converged());
        assert_eq!(report.pending.len(), 4);
        assert!(!report.config_changed);
        assert!(fake.writes().is_empty());
        assert!(store.load(&intent.resource_arn).await.unwrap().is_none());
    }
}
