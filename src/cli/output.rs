//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::planner::{ExecutionOutcome, Operation, StepReport, StepStatus, UndoStatus};
use crate::reconciler::{DriftReport, PlanPreview, ReconciliationResult};
use crate::state::{LockInfo, ResourceRecord, RunOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Change")]
    change: String,
}

/// Executed step row for table display.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Undo")]
    undo: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        state_machines: usize,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "state_machines": state_machines,
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid ({state_machines} state machine(s))\n", "✓".green())
                } else {
                    let mut output = format!(
                        "{} Configuration has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };

                if show_warnings && result.warning_count() > 0 {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats plan previews for display.
    #[must_use]
    pub fn format_plans(&self, previews: &[PlanPreview], detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(previews).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for preview in previews {
                    output.push_str(&Self::format_plan_text(preview, detailed));
                }
                let pending: usize = previews.iter().map(|p| p.plan.len()).sum();
                let _ = write!(
                    output,
                    "\nPlan: {} operation(s) across {} state machine(s)\n",
                    pending.to_string().yellow(),
                    previews.len()
                );
                output
            }
        }
    }

    /// Formats one plan as text.
    fn format_plan_text(preview: &PlanPreview, detailed: bool) -> String {
        let mut output = format!("\n📋 {}\n", preview.resource_arn.bold());
        let _ = writeln!(
            output,
            "   Intent hash: {}",
            ConfigHasher::short_hash(&preview.intent_hash)
        );
        if preview
            .recorded_hash
            .as_ref()
            .is_some_and(|h| *h != preview.intent_hash)
        {
            let _ = writeln!(output, "   {} configuration changed since last apply", "⚠".yellow());
        }

        if detailed {
            let current = &preview.current;
            let _ = writeln!(output, "   Role: {}", current.role_arn);
            let _ = writeln!(output, "   Logging: {}", current.logging);
            let _ = writeln!(output, "   Subscriptions: {}", current.subscriptions.len());
            let _ = writeln!(output, "   Tags: {}", current.tags.len());
        }

        if preview.plan.is_empty() {
            let _ = writeln!(
                output,
                "   {} No changes required - instrumentation is up to date.",
                "✓".green()
            );
            return output;
        }

        let rows: Vec<PlanRow> = preview
            .plan
            .iter()
            .enumerate()
            .map(|(i, op)| PlanRow {
                index: i + 1,
                action: Self::format_action(op),
                change: Self::truncate(&op.to_string(), 90),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        output
    }

    /// Formats drift reports.
    #[must_use]
    pub fn format_drift(&self, reports: &[DriftReport]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(reports).unwrap_or_default(),
            OutputFormat::Text => {
                let drifted: Vec<&DriftReport> =
                    reports.iter().filter(|r| !r.is_converged()).collect();

                if drifted.is_empty() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }

                let mut output = format!("{} Drift detected:\n", "⚠".yellow());
                for report in &drifted {
                    let _ = writeln!(output, "\n   {}", report.resource_arn);
                    for op in &report.pending {
                        let _ = writeln!(output, "     - {op}");
                    }
                }
                let _ = write!(
                    output,
                    "\n{}/{} state machines have drifted.\n",
                    drifted.len(),
                    reports.len()
                );
                output
            }
        }
    }

    /// Formats reconciliation results.
    #[must_use]
    pub fn format_reconciliation(&self, results: &[ReconciliationResult]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(results).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for result in results {
                    output.push_str(&Self::format_reconciliation_text(result));
                }
                output
            }
        }
    }

    fn format_reconciliation_text(result: &ReconciliationResult) -> String {
        let status = match result.execution.outcome {
            ExecutionOutcome::Success if result.execution.is_noop() => {
                format!("{} No changes required", "✓".green())
            }
            ExecutionOutcome::Success => format!("{} Instrumentation applied", "✓".green()),
            ExecutionOutcome::RolledBack => {
                format!("{} Failed, all changes reverted", "✗".red())
            }
            ExecutionOutcome::RollbackIncomplete => {
                format!("{} Failed, manual cleanup required", "✗".red().bold())
            }
        };

        let mut output = format!("\n{} {status}\n", result.resource_arn.bold());

        if !result.execution.is_noop() {
            let rows: Vec<StepRow> = result.execution.steps.iter().map(Self::step_row).collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if let Some((op, err)) = result.execution.forward_failure() {
            let _ = writeln!(output, "   Failed: {op}: {err}");
        }

        let undo_failures = result.execution.undo_failures();
        if !undo_failures.is_empty() {
            let _ = writeln!(output, "   {} Still applied:", "⚠".yellow());
            for (op, err) in undo_failures {
                let _ = writeln!(output, "     - {op} (undo failed: {err})");
            }
        }

        for error in &result.errors {
            let _ = writeln!(output, "   {} {error}", "⚠".yellow());
        }

        output
    }

    fn step_row(step: &StepReport) -> StepRow {
        let result = match &step.status {
            StepStatus::Applied => "applied".green().to_string(),
            StepStatus::AlreadyPresent => "already present".dimmed().to_string(),
            StepStatus::Failed { error } => format!("{} {}", "failed:".red(), error.kind()),
            StepStatus::NotAttempted => "not attempted".dimmed().to_string(),
        };
        let undo = match &step.undo {
            None => String::new(),
            Some(UndoStatus::Reverted) => "reverted".yellow().to_string(),
            Some(UndoStatus::UndoFailed { error }) => format!("{} {}", "failed:".red(), error.kind()),
        };

        StepRow {
            index: step.index + 1,
            operation: Self::truncate(&step.operation.to_string(), 70),
            result,
            undo,
        }
    }

    /// Formats a ledger record and its lease.
    #[must_use]
    pub fn format_record(&self, record: &ResourceRecord, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "record": record, "lock": lock });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("\n💾 {}\n\n", record.resource_arn.bold());

                let _ = writeln!(output, "   Version: {}", record.version);
                let _ = writeln!(
                    output,
                    "   Intent hash: {}",
                    if record.intent_hash.is_empty() {
                        "(never applied)"
                    } else {
                        ConfigHasher::short_hash(&record.intent_hash)
                    }
                );
                let _ = writeln!(output, "   Last updated: {}", record.last_updated);
                let keys: Vec<&str> = record.managed_tag_keys.iter().map(String::as_str).collect();
                let _ = writeln!(output, "   Managed tag keys: {}", keys.join(", "));

                match lock {
                    Some(lock) if !lock.is_expired() => {
                        let _ = writeln!(
                            output,
                            "   Lease: held by {} ({}s left, id {})",
                            lock.holder,
                            lock.remaining_secs(),
                            lock.lock_id
                        );
                    }
                    Some(lock) => {
                        let _ = writeln!(output, "   Lease: expired (held by {})", lock.holder);
                    }
                    None => {
                        let _ = writeln!(output, "   Lease: free");
                    }
                }

                if !record.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", record.history.len());
                    for entry in record.history.iter().rev().take(5) {
                        let mark = match entry.outcome {
                            RunOutcome::NoChange | RunOutcome::Applied => "✓".green(),
                            RunOutcome::RolledBack => "✗".yellow(),
                            RunOutcome::RollbackIncomplete => "✗".red(),
                        };
                        let _ = writeln!(
                            output,
                            "     {mark} {} - {} ({} operation(s))",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.outcome,
                            entry.operations.len()
                        );
                        if let Some(error) = &entry.error {
                            let _ = writeln!(output, "         {error}");
                        }
                    }
                }

                output
            }
        }
    }

    /// Formats a plain status message.
    #[must_use]
    pub fn message(&self, level: MessageLevel, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": level.as_str(), "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mark = match level {
                    MessageLevel::Success => "✓".green(),
                    MessageLevel::Warning => "⚠".yellow(),
                    MessageLevel::Error => "✗".red(),
                };
                format!("{mark} {message}")
            }
        }
    }

    /// Formats an operation kind with color.
    fn format_action(op: &Operation) -> String {
        match op {
            Operation::CreatePolicy { .. }
            | Operation::AttachPolicy { .. }
            | Operation::TagResource { .. } => format!("+{}", op.kind()).green().to_string(),
            Operation::Subscribe { previous_forwarder: None, .. } => {
                format!("+{}", op.kind()).green().to_string()
            }
            Operation::EnableLogging { .. } | Operation::Subscribe { .. } => {
                format!("~{}", op.kind()).yellow().to_string()
            }
            Operation::Unsubscribe { .. } | Operation::UntagResource { .. } => {
                format!("-{}", op.kind()).red().to_string()
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    /// Something completed.
    Success,
    /// Something needs attention.
    Warning,
    /// Something failed.
    Error,
}

impl MessageLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationError;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_validation_json_lists_errors() {
        let result = ValidationResult {
            errors: vec![ValidationError {
                field: String::from("state.bucket"),
                message: String::from("required"),
            }],
            warnings: vec![String::from("w")],
        };
        let output = OutputFormatter::new(OutputFormat::Json).format_validation(&result, 2, false);
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(json["valid"], false);
        assert_eq!(json["errors"][0], "state.bucket: required");
        assert_eq!(json["state_machines"], 2);
    }

    #[test]
    fn test_message_json() {
        let output = OutputFormatter::new(OutputFormat::Json).message(MessageLevel::Warning, "careful");
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["status"], "warning");
        assert_eq!(json["message"], "careful");
    }
}
