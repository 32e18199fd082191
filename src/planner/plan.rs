//! Execution plan types and construction.
//!
//! A plan orders a set of operations by dependency rank: the access policy
//! must exist and be attached before logging is enabled, the log group must
//! receive logs before a forwarder subscribes, and tags come last.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::operation::Operation;

/// An ordered, duplicate-free sequence of operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// When the plan was built.
    pub created_at: DateTime<Utc>,
    /// Operations in execution order.
    pub operations: Vec<Operation>,
}

/// Dependency rank of an operation; lower ranks run first.
#[must_use]
pub const fn rank(op: &Operation) -> u8 {
    match op {
        Operation::CreatePolicy { .. } => 0,
        Operation::AttachPolicy { .. } => 1,
        Operation::EnableLogging { .. } => 2,
        Operation::Unsubscribe { .. } | Operation::Subscribe { .. } => 3,
        Operation::TagResource { .. } | Operation::UntagResource { .. } => 4,
    }
}

impl Plan {
    /// Builds a plan from operations, dropping duplicates and ordering by
    /// rank. The order within a rank is the input order.
    #[must_use]
    pub fn build<I>(operations: I) -> Self
    where
        I: IntoIterator<Item = Operation>,
    {
        let mut ordered: Vec<Operation> = Vec::new();
        for op in operations {
            if !ordered.contains(&op) {
                ordered.push(op);
            }
        }
        ordered.sort_by_key(rank);

        Self {
            created_at: Utc::now(),
            operations: ordered,
        }
    }

    /// Returns true if the plan has nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Iterates over the operations in execution order.
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    /// One-line description per operation.
    #[must_use]
    pub fn descriptions(&self) -> Vec<String> {
        self.operations.iter().map(ToString::to_string).collect()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No changes. Instrumentation is up to date.");
        }
        writeln!(f, "Plan: {} operation(s)", self.len())?;
        for (i, op) in self.operations.iter().enumerate() {
            writeln!(f, "  {}. {op}", i + 1)?;
        }
        Ok(())
    }
}
