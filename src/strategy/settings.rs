//! Strategy settings
//!
//! A named set of session knobs and trial discipline, loaded from JSON with
//! serde defaults and validated before use.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::{StrategyError, StrategyResult};
use crate::estimate::AmbiguityPolicy;

/// Planner cost parameters that may be overridden
pub const COST_CONSTANTS: [&str; 7] = [
    "seq_page_cost",
    "random_page_cost",
    "cpu_tuple_cost",
    "cpu_index_tuple_cost",
    "cpu_operator_cost",
    "parallel_setup_cost",
    "parallel_tuple_cost",
];

/// Server limits on a column statistics target
pub const MIN_STATISTICS_TARGET: i32 = 1;
pub const MAX_STATISTICS_TARGET: i32 = 10000;

/// When the strategy is (re-)applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStrategy {
    /// Before the first trial only
    #[default]
    Once,
    /// Before every trial
    PerTrial,
}

impl ResetStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResetStrategy::Once => "once",
            ResetStrategy::PerTrial => "per_trial",
        }
    }
}

/// What happens to a trial's writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Undone after every trial
    #[default]
    Rollback,
    /// Committed, so later trials see them
    Persist,
}

impl TransactionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionMode::Rollback => "rollback",
            TransactionMode::Persist => "persist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySettings {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Discard session state (plans, temp tables) before applying and per trial
    #[serde(default = "default_true")]
    pub clear_caches: bool,

    /// Reset cumulative statistics counters along with the caches
    #[serde(default = "default_true")]
    pub reset_counters: bool,

    #[serde(default = "default_memory")]
    pub work_mem: String,

    #[serde(default = "default_memory")]
    pub maintenance_work_mem: String,

    #[serde(default = "default_timeout_ms")]
    pub statement_timeout_ms: u64,

    #[serde(default)]
    pub stats_reset_strategy: ResetStrategy,

    #[serde(default)]
    pub transaction_handling: TransactionMode,

    #[serde(default)]
    pub analyze_verbose: bool,

    /// Planner cost overrides, e.g. `random_page_cost`
    #[serde(default)]
    pub cost_constants: BTreeMap<String, f64>,

    /// Remember which encoding technique worked per field across
    /// re-applications
    #[serde(default)]
    pub encoding_cache: bool,

    #[serde(default)]
    pub ambiguous_columns: AmbiguityPolicy,

    #[serde(default = "default_min_target")]
    pub random_min_target: i32,

    #[serde(default = "default_max_target")]
    pub random_max_target: i32,

    /// Fixed seed for reproducible random targets
    #[serde(default)]
    pub random_seed: Option<u64>,

    /// Empty strategy: also delete existing catalog rows
    #[serde(default)]
    pub purge_statistics: bool,
}

fn default_name() -> String {
    "default".to_string()
}
fn default_true() -> bool {
    true
}
fn default_memory() -> String {
    "16MB".to_string()
}
fn default_timeout_ms() -> u64 {
    300_000
}
fn default_min_target() -> i32 {
    MIN_STATISTICS_TARGET
}
fn default_max_target() -> i32 {
    MAX_STATISTICS_TARGET
}

fn memory_pattern() -> StrategyResult<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, String>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[0-9]+(kB|MB|GB)?$").map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| StrategyError::invalid(format!("Memory size pattern: {}", e)))
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            description: String::new(),
            clear_caches: true,
            reset_counters: true,
            work_mem: default_memory(),
            maintenance_work_mem: default_memory(),
            statement_timeout_ms: default_timeout_ms(),
            stats_reset_strategy: ResetStrategy::default(),
            transaction_handling: TransactionMode::default(),
            analyze_verbose: false,
            cost_constants: BTreeMap::new(),
            encoding_cache: false,
            ambiguous_columns: AmbiguityPolicy::default(),
            random_min_target: MIN_STATISTICS_TARGET,
            random_max_target: MAX_STATISTICS_TARGET,
            random_seed: None,
            purge_statistics: false,
        }
    }
}

impl StrategySettings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> StrategyResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| StrategyError::invalid(format!("Failed to read settings: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate settings JSON
    pub fn from_json(content: &str) -> StrategyResult<Self> {
        let settings: StrategySettings = serde_json::from_str(content)
            .map_err(|e| StrategyError::invalid(format!("Invalid settings JSON: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> StrategyResult<()> {
        if self.name.trim().is_empty() {
            return Err(StrategyError::invalid("name must not be empty"));
        }
        if self.statement_timeout_ms == 0 {
            return Err(StrategyError::invalid("statement_timeout_ms must be > 0"));
        }
        for (field, value) in [
            ("work_mem", &self.work_mem),
            ("maintenance_work_mem", &self.maintenance_work_mem),
        ] {
            if !memory_pattern()?.is_match(value) {
                return Err(StrategyError::invalid(format!(
                    "Invalid {}: '{}'. Expected <digits>[kB|MB|GB].",
                    field, value
                )));
            }
        }
        for (name, value) in &self.cost_constants {
            if !COST_CONSTANTS.contains(&name.as_str()) {
                return Err(StrategyError::invalid(format!(
                    "Unknown cost constant '{}'",
                    name
                )));
            }
            if !value.is_finite() || *value < 0.0 {
                return Err(StrategyError::invalid(format!(
                    "Cost constant {} must be a non-negative number",
                    name
                )));
            }
        }
        if self.random_min_target < MIN_STATISTICS_TARGET
            || self.random_max_target > MAX_STATISTICS_TARGET
            || self.random_min_target > self.random_max_target
        {
            return Err(StrategyError::invalid(format!(
                "random targets must satisfy {} <= min <= max <= {}",
                MIN_STATISTICS_TARGET, MAX_STATISTICS_TARGET
            )));
        }
        Ok(())
    }

    /// Session parameters applied on every (re-)connection and after
    /// every cache clear
    pub fn knobs(&self) -> Vec<(String, String)> {
        let mut knobs = vec![
            (
                "statement_timeout".to_string(),
                self.statement_timeout_ms.to_string(),
            ),
            ("work_mem".to_string(), self.work_mem.clone()),
            (
                "maintenance_work_mem".to_string(),
                self.maintenance_work_mem.clone(),
            ),
        ];
        knobs.extend(
            self.cost_constants
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string())),
        );
        knobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = StrategySettings::from_json("{}").unwrap();
        assert_eq!(s, StrategySettings::default());
        assert!(s.clear_caches);
        assert_eq!(s.stats_reset_strategy, ResetStrategy::Once);
        assert_eq!(s.transaction_handling, TransactionMode::Rollback);
        assert_eq!(s.ambiguous_columns, AmbiguityPolicy::Drop);
    }

    #[test]
    fn test_enumerations_parse() {
        let s = StrategySettings::from_json(
            r#"{"stats_reset_strategy": "per_trial", "transaction_handling": "persist",
                "ambiguous_columns": "first_match"}"#,
        )
        .unwrap();
        assert_eq!(s.stats_reset_strategy, ResetStrategy::PerTrial);
        assert_eq!(s.transaction_handling, TransactionMode::Persist);
        assert!(StrategySettings::from_json(r#"{"stats_reset_strategy": "always"}"#).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(StrategySettings::from_json(r#"{"statement_timeout_ms": 0}"#).is_err());
        assert!(StrategySettings::from_json(r#"{"work_mem": "lots"}"#).is_err());
        assert!(StrategySettings::from_json(r#"{"work_mem": "64kB"}"#).is_ok());
        assert!(StrategySettings::from_json(r#"{"cost_constants": {"foo_cost": 1}}"#).is_err());
        assert!(
            StrategySettings::from_json(r#"{"random_min_target": 50, "random_max_target": 10}"#)
                .is_err()
        );
    }

    #[test]
    fn test_memory_pattern_compiles() {
        let pattern = memory_pattern().unwrap();
        assert!(pattern.is_match("16MB"));
        assert!(pattern.is_match("1024"));
        assert!(!pattern.is_match("16 MB"));
    }

    #[test]
    fn test_knobs() {
        let mut s = StrategySettings::default();
        s.cost_constants.insert("random_page_cost".into(), 1.1);
        let knobs = s.knobs();
        assert_eq!(knobs[0], ("statement_timeout".into(), "300000".into()));
        assert!(knobs.contains(&("random_page_cost".into(), "1.1".into())));
    }
}
