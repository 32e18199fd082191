//! Planning module for instrumentation changes.
//!
//! This module handles the comparison between the desired intent and the
//! observed state, ordering the resulting operations into a plan, and
//! executing the plan with compensating rollback.

mod diff;
mod executor;
mod intent;
mod operation;
mod plan;

pub use diff::{OperationSet, StateDiffer};
pub use executor::{ExecutionOutcome, ExecutionResult, PlanExecutor, StepReport, StepStatus, UndoStatus};
pub use intent::{logs_delivery_policy_document, DesiredIntent, PolicyIntent};
pub use operation::{ForwardEffect, Operation};
pub use plan::{rank, Plan};
