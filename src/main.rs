//! sfn-instrument CLI entrypoint.
//!
//! This is the main entrypoint for the sfn-instrument command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use sfn_instrument::cli::{Cli, Commands, MessageLevel, OutputFormatter, StateCommands};
use sfn_instrument::config::{
    find_config_file, ConfigParser, ConfigValidator, InstrumentConfig, StateBackend,
    StateMachineConfig,
};
use sfn_instrument::error::{ConfigError, ReconcileError, Result};
use sfn_instrument::planner::DesiredIntent;
use sfn_instrument::reconciler::Reconciler;
use sfn_instrument::remote::AwsResourceApi;
use sfn_instrument::state::{LocalStateStore, S3StateStore, StateStore, STATE_DIR};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code of `drift` when at least one state machine has drifted.
const EXIT_DRIFT: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs go to stderr so stdout stays
/// parseable with `--output json`.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { detailed, target } => {
            cmd_plan(config_path, detailed, target.as_deref(), &formatter).await
        }
        Commands::Apply { yes, target } => {
            cmd_apply(config_path, yes, target.as_deref(), &formatter).await
        }
        Commands::Drift { target } => cmd_drift(config_path, target.as_deref(), &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let config = load_config(&config_file)?;
    let result = ConfigValidator::new().check(&config);

    println!(
        "{}",
        formatter.format_validation(&result, config.state_machines.len(), show_warnings)
    );

    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show the instrumentation plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    target: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let intents = desired_intents(&config, target)?;
    let api = AwsResourceApi::new(config.aws.region.as_deref()).await;

    let reconciler = Reconciler::new(&api, state_store.as_ref());
    let mut previews = Vec::with_capacity(intents.len());
    for intent in &intents {
        previews.push(reconciler.plan(intent).await?);
    }

    println!("{}", formatter.format_plans(&previews, detailed));
    Ok(ExitCode::SUCCESS)
}

/// Apply the instrumentation plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    target: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let intents = desired_intents(&config, target)?;
    let api = AwsResourceApi::new(config.aws.region.as_deref()).await;

    let reconciler = Reconciler::new(&api, state_store.as_ref());

    let mut pending = Vec::new();
    let mut previews = Vec::new();
    for intent in intents {
        let preview = reconciler.plan(&intent).await?;
        if !preview.plan.is_empty() {
            pending.push(intent);
            previews.push(preview);
        }
    }

    if pending.is_empty() {
        eprintln!("{}", formatter.message(MessageLevel::Success, "No changes to apply."));
        return Ok(ExitCode::SUCCESS);
    }

    if !auto_approve {
        eprintln!("{}", formatter.format_plans(&previews, false));
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current operation");
            signal.cancel();
        }
    });

    let mut results = Vec::with_capacity(pending.len());
    let mut failed = false;
    for intent in &pending {
        if cancel.is_cancelled() {
            let skipped = ReconcileError::Aborted {
                reason: String::from("interrupted before start"),
            };
            warn!(resource = %intent.resource_arn, "{skipped}");
            failed = true;
            continue;
        }
        match reconciler.reconcile(intent, &cancel).await {
            Ok(result) => {
                failed |= !result.is_success();
                results.push(result);
            }
            Err(e) => {
                failed = true;
                let hint = if e.is_retryable() { " (safe to retry later)" } else { "" };
                eprintln!(
                    "{}",
                    formatter.message(
                        MessageLevel::Error,
                        &format!("{}: {e}{hint}", intent.resource_arn)
                    )
                );
            }
        }
    }

    println!("{}", formatter.format_reconciliation(&results));

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Check for drift.
async fn cmd_drift(
    config_path: Option<&PathBuf>,
    target: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let intents = desired_intents(&config, target)?;
    let api = AwsResourceApi::new(config.aws.region.as_deref()).await;

    let reconciler = Reconciler::new(&api, state_store.as_ref());
    let mut reports = Vec::with_capacity(intents.len());
    for intent in &intents {
        reports.push(reconciler.check_drift(intent).await?);
    }

    println!("{}", formatter.format_drift(&reports));

    Ok(if reports.iter().all(|r| r.is_converged()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_DRIFT)
    })
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show { arn } => {
            let lock = state_store.get_lock_info(&arn).await?;
            if let Some(record) = state_store.load(&arn).await? {
                println!("{}", formatter.format_record(&record, lock.as_ref()));
            } else {
                eprintln!(
                    "{}",
                    formatter.message(MessageLevel::Warning, &format!("No record found for {arn}"))
                );
            }
        }
        StateCommands::Unlock { arn, lock_id, force } => {
            if force {
                state_store.force_unlock(&arn).await?;
                eprintln!("{}", formatter.message(MessageLevel::Success, "Lease forcefully released."));
            } else if let Some(id) = lock_id {
                state_store.release_lock(&arn, &id).await?;
                eprintln!("{}", formatter.message(MessageLevel::Success, "Lease released."));
            } else {
                return Err(ConfigError::validation("Provide --lock-id or use --force", "lock_id").into());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory holding the configuration file.
fn config_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Loads `.env` and the configuration with environment overrides.
fn load_config(config_file: &Path) -> Result<InstrumentConfig> {
    let parser = ConfigParser::new().with_base_path(config_dir(config_file));
    parser.load_dotenv()?;
    parser.load_with_env(config_file)
}

/// Loads configuration and creates the ledger store it names.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(InstrumentConfig, Box<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let config = load_config(&config_file)?;
    let validation = ConfigValidator::new().validate(&config)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let state_store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config.state.path.as_ref().map_or_else(
                || config_dir(&config_file).join(STATE_DIR),
                PathBuf::from,
            );
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| ConfigError::validation("S3 bucket not configured", "state.bucket"))?;
            let region = config.state.region.as_deref().or(config.aws.region.as_deref());
            Box::new(S3StateStore::new(bucket, config.state.prefix.as_deref(), region).await)
        }
    };

    Ok((config, state_store))
}

/// Derives the desired intents for the targeted state machines.
fn desired_intents(config: &InstrumentConfig, target: Option<&str>) -> Result<Vec<DesiredIntent>> {
    let machines: Vec<&StateMachineConfig> = match target {
        Some(arn) => vec![config
            .find_state_machine(arn)
            .ok_or_else(|| ConfigError::UnknownTarget { arn: arn.to_string() })?],
        None => config.state_machines.iter().collect(),
    };

    machines
        .into_iter()
        .map(|sm| {
            DesiredIntent::from_config(config, sm).map_err(|e| {
                ReconcileError::InvalidIntent {
                    resource: sm.arn.clone(),
                    reason: e.to_string(),
                }
                .into()
            })
        })
        .collect()
}
