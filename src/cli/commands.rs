//! CLI command implementations
//!
//! Every command builds its collaborators explicitly from configuration,
//! prints one JSON response on stdout and reports progress on stderr.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::estimate::{
    parse_document, summarize, EstimateProvider, FileEstimateProvider, Sanitizer, SchemaInfo,
};
use crate::experiment::{
    ExperimentConfig, ExperimentLedger, ExperimentStatus, FileLedger, MemoryLedger, Milestone,
    StatusHandle, TrialOrchestrator,
};
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry, Severity};
use crate::session::{PgConnector, PgProvisioner, PgSession, Session};
use crate::strategy::{StrategyContext, StrategyRegistry, StrategySettings};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments and run the command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    if let Some(level) = &cli.log_level {
        let severity = Severity::parse(level)
            .ok_or_else(|| CliError::config_error(format!("Unknown log level: '{}'", level)))?;
        Logger::set_min_severity(severity);
    }
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    let result = match cmd {
        Command::Run { config } => run_experiment(&config),
        Command::Sanitize {
            schema,
            estimates,
            settings,
        } => sanitize(&schema, &estimates, settings.as_deref()),
        Command::Strategies => strategies(),
        Command::Snapshot { url } => snapshot(&url),
    };
    if let Err(e) = &result {
        write_error(e.code_str(), e.message())?;
    }
    result
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::runtime_error(format!("Failed to create tokio runtime: {}", e)))
}

/// Run one experiment described by a configuration file
///
/// 1. Configuration load and validation
/// 2. Strategy construction through the registry
/// 3. Orchestrated run against PostgreSQL
/// 4. Record printed (and kept in the ledger directory if configured)
pub fn run_experiment(config_path: &Path) -> CliResult<()> {
    let config = ExperimentConfig::load(config_path)?;
    log_event_with_fields(
        Event::ConfigLoaded,
        &[
            ("path", &config_path.display().to_string()),
            ("strategy", &config.strategy),
            ("database", &config.database_name),
        ],
    );

    let metrics = Arc::new(MetricsRegistry::new());
    let mut context = StrategyContext::new(metrics.clone());
    if let Some(path) = &config.estimates_path {
        let provider: Arc<dyn EstimateProvider> = Arc::new(FileEstimateProvider::new(path));
        context = context.with_provider(provider);
    }
    let strategy =
        StrategyRegistry::with_builtins().create(&config.strategy, config.settings.clone(), &context)?;

    let ledger: Arc<dyn ExperimentLedger> = match &config.ledger_dir {
        Some(dir) => Arc::new(FileLedger::open(dir)?),
        None => Arc::new(MemoryLedger::new()),
    };
    let orchestrator = TrialOrchestrator::new(
        Arc::new(PgProvisioner::new(
            config.admin_url.clone(),
            config.database_url_template.clone(),
        )),
        Arc::new(PgConnector::new(config.database_url_template.clone())),
        ledger,
        metrics.clone(),
    )
    .with_auto_refresh(context.auto_refresh.clone());

    let plan = config.plan();
    let status = StatusHandle::new();
    let mut progress = |id: Uuid, milestone: &Milestone| {
        eprintln!("[{}] {}", id, milestone);
    };

    let record = runtime()?.block_on(orchestrator.run(
        &plan,
        strategy.as_ref(),
        &mut progress,
        &status,
    ));

    write_response(json!({
        "experiment": serde_json::to_value(&record)?,
        "metrics": serde_json::to_value(metrics.snapshot())?,
    }))?;

    match record.status {
        ExperimentStatus::Success => Ok(()),
        _ => Err(CliError::experiment_failed(
            record.error.unwrap_or_else(|| "experiment failed".to_string()),
        )),
    }
}

/// Sanitize estimate rows offline and print the result with a per-table
/// summary
pub fn sanitize(schema_path: &Path, estimates_path: &Path, settings: Option<&Path>) -> CliResult<()> {
    let schema_text = fs::read_to_string(schema_path)
        .map_err(|e| CliError::config_error(format!("Failed to read schema: {}", e)))?;
    let schema: SchemaInfo = serde_json::from_str(&schema_text)
        .map_err(|e| CliError::config_error(format!("Invalid schema JSON: {}", e)))?;

    let estimates_text = fs::read_to_string(estimates_path)
        .map_err(|e| CliError::config_error(format!("Failed to read estimates: {}", e)))?;
    let raw = parse_document(&estimates_text)?;

    let settings = match settings {
        Some(path) => StrategySettings::load(path)?,
        None => StrategySettings::default(),
    };

    let report = Sanitizer::new(settings.ambiguous_columns).validate(&raw, &schema);
    let dropped: Vec<Value> = report
        .dropped
        .iter()
        .map(|d| {
            json!({
                "label": d.label,
                "code": d.error.code(),
                "reason": d.error.to_string(),
            })
        })
        .collect();

    write_response(json!({
        "estimates": serde_json::to_value(&report.estimates)?,
        "dropped": dropped,
        "summary": serde_json::to_value(summarize(&report.estimates))?,
    }))
}

/// List the registered strategies
pub fn strategies() -> CliResult<()> {
    let listing: Vec<Value> = StrategyRegistry::with_builtins()
        .describe()
        .into_iter()
        .map(|(id, description)| json!({"id": id, "description": description}))
        .collect();
    write_response(Value::Array(listing))
}

/// Print the planner-facing and raw catalog snapshot of a live database
pub fn snapshot(url: &str) -> CliResult<()> {
    let snapshot = runtime()?.block_on(async {
        let mut session = PgSession::connect(url).await?;
        session.snapshot().await
    })?;
    write_response(serde_json::to_value(&snapshot)?)
}
