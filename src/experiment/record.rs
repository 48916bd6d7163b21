//! Experiment and trial records
//!
//! An experiment record is RUNNING until it is sealed as SUCCESS or
//! FAILURE. After that only the trailing log may grow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::{ExperimentError, ExperimentResult};
use crate::catalog::CatalogSnapshot;
use crate::strategy::{ResetStrategy, TransactionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    Running,
    Success,
    Failure,
}

impl ExperimentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Success => "SUCCESS",
            ExperimentStatus::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != ExperimentStatus::Running
    }
}

/// One trial. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based
    pub index: usize,
    pub started_at: DateTime<Utc>,
    pub execution_time_ms: f64,
    /// Planner's total cost from the plan-only probe
    pub cost_estimate: f64,
    pub query_plan: Value,
    /// Rows returned or affected
    pub rows: u64,
    pub catalog_snapshot: CatalogSnapshot,
}

/// Mean, sample standard deviation and range of trial times
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub avg_time_ms: f64,
    pub stddev_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
}

/// Aggregate of execution times. Sample standard deviation; a single trial
/// has a deviation of 0.
pub fn aggregate(times: &[f64]) -> Option<Aggregate> {
    if times.is_empty() {
        return None;
    }
    let n = times.len() as f64;
    let mean = times.iter().sum::<f64>() / n;
    let stddev = if times.len() > 1 {
        let sq: f64 = times.iter().map(|t| (t - mean).powi(2)).sum();
        (sq / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    Some(Aggregate {
        avg_time_ms: mean,
        stddev_time_ms: stddev,
        min_time_ms: times.iter().copied().fold(f64::INFINITY, f64::min),
        max_time_ms: times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

/// Structural fingerprint of an `EXPLAIN (FORMAT JSON)` plan: node types
/// and relations, depth first. Costs and row estimates are ignored.
pub fn plan_shape(plan: &Value) -> String {
    fn walk(node: &Value, out: &mut Vec<String>) {
        let node_type = node.get("Node Type").and_then(Value::as_str).unwrap_or("?");
        match node.get("Relation Name").and_then(Value::as_str) {
            Some(rel) => out.push(format!("{}({})", node_type, rel)),
            None => out.push(node_type.to_string()),
        }
        if let Some(children) = node.get("Plans").and_then(Value::as_array) {
            out.push("[".to_string());
            for child in children {
                walk(child, out);
            }
            out.push("]".to_string());
        }
    }

    let root = match plan {
        Value::Array(items) => items.first().and_then(|i| i.get("Plan")),
        other => other.get("Plan"),
    };
    let mut parts = Vec::new();
    if let Some(root) = root {
        walk(root, &mut parts);
    }
    parts.join(" ")
}

/// Total cost of the root plan node, 0 if absent
pub fn plan_cost(plan: &Value) -> f64 {
    let root = match plan {
        Value::Array(items) => items.first().and_then(|i| i.get("Plan")),
        other => other.get("Plan"),
    };
    root.and_then(|r| r.get("Total Cost"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: Uuid,
    pub name: String,
    /// Strategy requested
    pub strategy: String,
    /// Strategy that produced the statistics, if it differs after a fallback
    pub effective_strategy: Option<String>,
    pub query: String,
    pub database: String,
    pub iterations: usize,
    pub reset_strategy: ResetStrategy,
    pub transaction_mode: TransactionMode,
    pub status: ExperimentStatus,
    pub stats_applications: usize,
    pub aggregate: Option<Aggregate>,
    pub plans_diverged: bool,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub trials: Vec<TrialRecord>,
    pub logs: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExperimentRecord {
    pub fn new(
        name: &str,
        strategy: &str,
        query: &str,
        database: &str,
        iterations: usize,
        reset_strategy: ResetStrategy,
        transaction_mode: TransactionMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            strategy: strategy.to_string(),
            effective_strategy: None,
            query: query.to_string(),
            database: database.to_string(),
            iterations,
            reset_strategy,
            transaction_mode,
            status: ExperimentStatus::Running,
            stats_applications: 0,
            aggregate: None,
            plans_diverged: false,
            error: None,
            error_code: None,
            trials: Vec::new(),
            logs: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn ensure_running(&self) -> ExperimentResult<()> {
        if self.status.is_terminal() {
            return Err(ExperimentError::RecordSealed(self.status.as_str().to_string()));
        }
        Ok(())
    }

    pub fn append_trial(&mut self, trial: TrialRecord) -> ExperimentResult<()> {
        self.ensure_running()?;
        self.trials.push(trial);
        Ok(())
    }

    pub fn record_application(&mut self, effective: Option<&str>) -> ExperimentResult<()> {
        self.ensure_running()?;
        self.stats_applications += 1;
        if let Some(s) = effective {
            self.effective_strategy = Some(s.to_string());
        }
        Ok(())
    }

    /// Trailing log line; allowed in every state
    pub fn log(&mut self, message: impl Into<String>) {
        self.logs
            .push(format!("{} {}", Utc::now().to_rfc3339(), message.into()));
    }

    pub fn execution_times(&self) -> Vec<f64> {
        self.trials.iter().map(|t| t.execution_time_ms).collect()
    }

    /// True when any trial's plan shape differs from the first trial's
    pub fn detect_plan_divergence(&self) -> bool {
        let mut shapes = self.trials.iter().map(|t| plan_shape(&t.query_plan));
        match shapes.next() {
            Some(first) => shapes.any(|s| s != first),
            None => false,
        }
    }

    pub fn succeed(&mut self, aggregate: Option<Aggregate>, plans_diverged: bool) -> ExperimentResult<()> {
        self.ensure_running()?;
        self.aggregate = aggregate;
        self.plans_diverged = plans_diverged;
        self.status = ExperimentStatus::Success;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: &ExperimentError) -> ExperimentResult<()> {
        self.ensure_running()?;
        self.error = Some(error.to_string());
        self.error_code = Some(error.code().to_string());
        self.status = ExperimentStatus::Failure;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ExperimentRecord {
        ExperimentRecord::new(
            "e",
            "builtin",
            "SELECT 1",
            "statbench_x",
            3,
            ResetStrategy::Once,
            TransactionMode::Rollback,
        )
    }

    fn trial(index: usize, ms: f64, plan: Value) -> TrialRecord {
        TrialRecord {
            index,
            started_at: Utc::now(),
            execution_time_ms: ms,
            cost_estimate: plan_cost(&plan),
            query_plan: plan,
            rows: 0,
            catalog_snapshot: CatalogSnapshot::default(),
        }
    }

    #[test]
    fn test_aggregate() {
        let agg = aggregate(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(agg.avg_time_ms, 5.0);
        assert!((agg.stddev_time_ms - 2.138089935).abs() < 1e-6);
        assert_eq!(agg.min_time_ms, 2.0);
        assert_eq!(agg.max_time_ms, 9.0);

        let single = aggregate(&[3.5]).unwrap();
        assert_eq!(single.stddev_time_ms, 0.0);
        assert!(aggregate(&[]).is_none());
    }

    #[test]
    fn test_plan_shape_ignores_costs() {
        let a = json!([{"Plan": {"Node Type": "Seq Scan", "Relation Name": "t", "Total Cost": 1.0}}]);
        let b = json!([{"Plan": {"Node Type": "Seq Scan", "Relation Name": "t", "Total Cost": 9.0}}]);
        let c = json!([{"Plan": {"Node Type": "Hash Join", "Plans": [
            {"Node Type": "Seq Scan", "Relation Name": "t"},
            {"Node Type": "Hash", "Plans": [{"Node Type": "Seq Scan", "Relation Name": "u"}]}
        ]}}]);
        assert_eq!(plan_shape(&a), plan_shape(&b));
        assert_eq!(plan_shape(&c), "Hash Join [ Seq Scan(t) Hash [ Seq Scan(u) ] ]");
        assert_eq!(plan_cost(&b), 9.0);
    }

    #[test]
    fn test_divergence() {
        let mut r = record();
        let scan = json!([{"Plan": {"Node Type": "Seq Scan", "Relation Name": "t"}}]);
        let index = json!([{"Plan": {"Node Type": "Index Scan", "Relation Name": "t"}}]);
        r.append_trial(trial(1, 1.0, scan.clone())).unwrap();
        r.append_trial(trial(2, 1.0, scan)).unwrap();
        assert!(!r.detect_plan_divergence());
        r.append_trial(trial(3, 1.0, index)).unwrap();
        assert!(r.detect_plan_divergence());
    }

    #[test]
    fn test_sealed_record() {
        let mut r = record();
        r.fail(&ExperimentError::Cancelled { completed: 0 }).unwrap();
        assert_eq!(r.status, ExperimentStatus::Failure);
        assert_eq!(r.error_code.as_deref(), Some("STATBENCH_EXPERIMENT_CANCELLED"));
        assert!(r.finished_at.is_some());

        assert!(matches!(
            r.append_trial(trial(1, 1.0, Value::Null)),
            Err(ExperimentError::RecordSealed(_))
        ));
        assert!(r.succeed(None, false).is_err());

        r.log("teardown complete");
        assert_eq!(r.logs.len(), 1);
    }

    #[test]
    fn test_status_serializes_upper() {
        assert_eq!(
            serde_json::to_value(ExperimentStatus::Success).unwrap(),
            json!("SUCCESS")
        );
    }
}
