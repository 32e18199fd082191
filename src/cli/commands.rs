//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sfn-instrument - Idempotent logging instrumentation for Step Functions state machines.
#[derive(Parser, Debug)]
#[command(name = "sfn-instrument")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "SFN_INSTRUMENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the instrumentation configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the operations needed to instrument each state machine.
    Plan {
        /// Show the observed state alongside the plan.
        #[arg(short, long)]
        detailed: bool,

        /// Only plan this state machine.
        #[arg(long)]
        target: Option<String>,
    },

    /// Apply the instrumentation plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Only apply to this state machine.
        #[arg(long)]
        target: Option<String>,
    },

    /// Check for drift between config and actual state.
    Drift {
        /// Only check this state machine.
        #[arg(long)]
        target: Option<String>,
    },

    /// Inspect and manage the instrumentation ledger.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the ledger record of a state machine.
    Show {
        /// State machine ARN.
        arn: String,
    },

    /// Release the lease on a state machine.
    Unlock {
        /// State machine ARN.
        arn: String,

        /// Lease ID to release.
        #[arg(long, conflicts_with = "force")]
        lock_id: Option<String>,

        /// Force unlock regardless of holder (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
