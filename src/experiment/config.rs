//! Experiment configuration file

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{ExperimentError, ExperimentResult};
use crate::pgtext::is_plain_identifier;
use crate::strategy::StrategySettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,

    /// Registry id of the statistics strategy
    pub strategy: String,

    /// Workload statement run in every trial
    pub query: String,

    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Maintenance database used to create and drop the ephemeral one
    pub admin_url: String,

    /// Connection URL with a `{db}` placeholder
    pub database_url_template: String,

    #[serde(default = "generate_database_name")]
    pub database_name: String,

    /// SQL dump that seeds the ephemeral database
    #[serde(default)]
    pub dump_path: Option<PathBuf>,

    /// JSON estimate rows for the estimate-driven strategy
    #[serde(default)]
    pub estimates_path: Option<PathBuf>,

    /// Directory of the file ledger; records are only kept in memory if unset
    #[serde(default)]
    pub ledger_dir: Option<PathBuf>,

    #[serde(default)]
    pub settings: StrategySettings,
}

fn default_iterations() -> usize {
    1
}

/// `statbench_<uuid>` with the hyphens removed
pub fn generate_database_name() -> String {
    format!("statbench_{}", Uuid::new_v4().simple())
}

impl ExperimentConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> ExperimentResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ExperimentError::Config(format!("Failed to read config: {}", e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> ExperimentResult<Self> {
        let config: ExperimentConfig = serde_json::from_str(content)
            .map_err(|e| ExperimentError::Config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ExperimentResult<()> {
        if self.name.trim().is_empty() {
            return Err(ExperimentError::Config("name must not be empty".into()));
        }
        if self.strategy.trim().is_empty() {
            return Err(ExperimentError::Config("strategy must not be empty".into()));
        }
        if self.query.trim().is_empty() {
            return Err(ExperimentError::Config("query must not be empty".into()));
        }
        if self.iterations == 0 {
            return Err(ExperimentError::Config("iterations must be >= 1".into()));
        }
        if !self.database_url_template.contains("{db}") {
            return Err(ExperimentError::Config(
                "database_url_template must contain {db}".into(),
            ));
        }
        if !is_plain_identifier(&self.database_name) {
            return Err(ExperimentError::Config(format!(
                "database_name '{}' is not a plain identifier",
                self.database_name
            )));
        }
        self.settings.validate()?;
        Ok(())
    }

    /// What the orchestrator needs to run this configuration
    pub fn plan(&self) -> ExperimentPlan {
        ExperimentPlan {
            name: self.name.clone(),
            query: self.query.clone(),
            iterations: self.iterations,
            database: self.database_name.clone(),
            dump_path: self.dump_path.clone(),
        }
    }
}

/// One experiment run
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentPlan {
    pub name: String,
    pub query: String,
    pub iterations: usize,
    pub database: String,
    pub dump_path: Option<PathBuf>,
}

impl ExperimentPlan {
    /// A plan with a generated database name and no dump
    pub fn new(name: &str, query: &str, iterations: usize) -> Self {
        Self {
            name: name.to_string(),
            query: query.to_string(),
            iterations,
            database: generate_database_name(),
            dump_path: None,
        }
    }
}
