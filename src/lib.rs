// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness
#![warn(dead_code)]                   // Unused code is reported
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # sfn-instrument
//!
//! Idempotent, reversible logging instrumentation for AWS Step Functions
//! state machines.
//!
//! ## Overview
//!
//! For each configured state machine the tool converges four things:
//!
//! - Logging enabled toward a CloudWatch Logs log group
//! - The log delivery access policy created and attached to the execution role
//! - A subscription filter forwarding the log group to a forwarder
//! - Resource tags
//!
//! ## Architecture
//!
//! Every run is **observe, diff, plan, execute**:
//!
//! 1. **Desired intent**: derived from `sfn-instrument.yaml` and the state machine ARN
//! 2. **Observed state**: read fresh from the remote APIs
//! 3. **Plan**: the minimal ordered set of operations to close the gap
//! 4. **Executor**: applies the plan and, on failure, undoes every applied
//!    operation in reverse order
//!
//! A run against a converged state machine performs no writes.
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`remote`]: Remote resource API, AWS adapter and observer
//! - [`planner`]: Desired intent, diff, plan building and execution
//! - [`state`]: Instrumentation ledger and per-resource leases (local, S3)
//! - [`reconciler`]: Reconciliation engine
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! forwarder_arn: arn:aws:lambda:us-east-1:123456789012:function:log-forwarder
//! tags:
//!   team: data
//!
//! state_machines:
//!   - arn: arn:aws:states:us-east-1:123456789012:stateMachine:orders
//!     logging:
//!       level: ALL
//!       include_execution_data: true
//!     tags:
//!       env: prod
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod remote;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, InstrumentConfig};
pub use error::{InstrumentError, RemoteError, Result};
pub use planner::{DesiredIntent, ExecutionResult, Operation, Plan, PlanExecutor, StateDiffer};
pub use reconciler::{DriftReport, PlanPreview, ReconciliationResult, Reconciler};
pub use remote::{AwsResourceApi, RemoteResourceApi, ResourceObserver, ResourceState};
pub use state::{LocalStateStore, ResourceRecord, S3StateStore, StateStore};
