//! CLI module for the instrumentation tool.
//!
//! This module provides the command-line interface for planning and
//! applying state machine instrumentation.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::{MessageLevel, OutputFormatter};
