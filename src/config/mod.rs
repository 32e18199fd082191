//! Configuration module for the instrumentation tool.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `sfn-instrument.yaml`
//! - Validation of configuration values
//! - Computing intent hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    AwsSettings, InstrumentConfig, LoggingSpec, StateBackend, StateConfig, StateMachineConfig,
};
pub use parser::{ConfigParser, find_config_file, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
