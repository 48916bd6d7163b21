//! Experiment Lifecycle Tests
//!
//! Full orchestrated runs against the in-memory cluster.
//!
//! Test Categories:
//! 1. Strategy re-application discipline (once / per_trial)
//! 2. Transaction discipline (rollback / persist)
//! 3. Failure paths always end terminal and torn down
//! 4. Strategy fallback
//! 5. Observers, status and ledger

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use statbench::catalog::TableRef;
use statbench::estimate::{RawEstimate, StaticEstimateProvider};
use statbench::experiment::{
    ExperimentLedger, ExperimentPlan, ExperimentRecord, ExperimentStatus, FileLedger,
    MemoryLedger, Milestone, NoopObserver, ProgressObserver, StatusHandle, TrialOrchestrator,
};
use statbench::observability::MetricsRegistry;
use statbench::session::{Effect, MemoryCluster, MemoryDatabase, Session};
use statbench::strategy::{
    recompute, ApplyOutcome, ResetStrategy, StatsStrategy, StrategyContext, StrategyRegistry,
    StrategyResult, StrategySettings, TransactionMode,
};

const SCAN: &str = "SELECT * FROM orders WHERE amount > 100";
const INSERT: &str = "INSERT INTO orders SELECT * FROM staging";
const SLEEP: &str = "SELECT pg_sleep(3600)";

fn cluster() -> MemoryCluster {
    let template = MemoryDatabase::new()
        .with_table("orders", 200, &[("id", "integer"), ("amount", "numeric")])
        .with_table("staging", 5, &[("id", "integer"), ("amount", "numeric")]);
    template.script(
        SCAN,
        Effect::Select {
            table: "orders".into(),
        },
    );
    template.script(
        INSERT,
        Effect::Insert {
            table: "orders".into(),
            rows: 5,
        },
    );
    template.script(SLEEP, Effect::Timeout);
    MemoryCluster::new(template)
}

struct Harness {
    cluster: MemoryCluster,
    metrics: Arc<MetricsRegistry>,
    context: StrategyContext,
    ledger: Arc<dyn ExperimentLedger>,
}

impl Harness {
    fn new() -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        Self {
            cluster: cluster(),
            context: StrategyContext::new(metrics.clone()),
            metrics,
            ledger: Arc::new(MemoryLedger::new()),
        }
    }

    fn with_estimates(mut self, rows: serde_json::Value) -> Self {
        let rows: Vec<RawEstimate> = serde_json::from_value(rows).unwrap();
        self.context = self
            .context
            .with_provider(Arc::new(StaticEstimateProvider::new(rows)));
        self
    }

    fn orchestrator(&self) -> TrialOrchestrator {
        TrialOrchestrator::new(
            Arc::new(self.cluster.clone()),
            Arc::new(self.cluster.clone()),
            self.ledger.clone(),
            self.metrics.clone(),
        )
        .with_auto_refresh(self.context.auto_refresh.clone())
    }

    async fn run_with(
        &self,
        strategy: &str,
        settings: StrategySettings,
        plan: &ExperimentPlan,
        observer: &mut dyn ProgressObserver,
        status: &StatusHandle,
    ) -> ExperimentRecord {
        let strategy = StrategyRegistry::with_builtins()
            .create(strategy, settings, &self.context)
            .unwrap();
        self.orchestrator()
            .run(plan, strategy.as_ref(), observer, status)
            .await
    }

    async fn run(
        &self,
        strategy: &str,
        settings: StrategySettings,
        plan: &ExperimentPlan,
    ) -> ExperimentRecord {
        self.run_with(strategy, settings, plan, &mut NoopObserver, &StatusHandle::new())
            .await
    }

    /// The database the last run worked on (kept readable after the drop)
    fn database(&self) -> MemoryDatabase {
        self.cluster.last_created().unwrap().1
    }
}

fn settings(reset: ResetStrategy, mode: TransactionMode) -> StrategySettings {
    StrategySettings {
        stats_reset_strategy: reset,
        transaction_handling: mode,
        ..StrategySettings::default()
    }
}

// =============================================================================
// RE-APPLICATION DISCIPLINE
// =============================================================================

/// Scenario: 3 iterations with reset "once" apply statistics exactly once,
/// before trial 1, and every snapshot equals the first.
#[tokio::test]
async fn test_once_applies_single_time_and_snapshots_match() {
    let h = Harness::new();
    let plan = ExperimentPlan::new("once", SCAN, 3);
    let record = h
        .run(
            "builtin",
            settings(ResetStrategy::Once, TransactionMode::Rollback),
            &plan,
        )
        .await;

    assert_eq!(record.status, ExperimentStatus::Success, "{:?}", record.error);
    assert_eq!(record.stats_applications, 1);
    assert_eq!(h.database().analyze_runs(), 1);
    assert_eq!(h.metrics.snapshot().stats_applications, 1);

    assert_eq!(record.trials.len(), 3);
    let first = &record.trials[0].catalog_snapshot;
    assert!(!first.is_empty());
    assert_eq!(&record.trials[1].catalog_snapshot, first);
    assert_eq!(&record.trials[2].catalog_snapshot, first);
    assert_eq!(
        record.trials.iter().map(|t| t.index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let agg = record.aggregate.unwrap();
    assert!(agg.min_time_ms <= agg.avg_time_ms && agg.avg_time_ms <= agg.max_time_ms);
    assert!(agg.stddev_time_ms >= 0.0);
}

/// Test: "per_trial" applies before every trial.
#[tokio::test]
async fn test_per_trial_applies_before_every_trial() {
    let h = Harness::new();
    let plan = ExperimentPlan::new("per trial", SCAN, 4);
    let record = h
        .run(
            "builtin",
            settings(ResetStrategy::PerTrial, TransactionMode::Rollback),
            &plan,
        )
        .await;

    assert_eq!(record.status, ExperimentStatus::Success);
    assert_eq!(record.stats_applications, 4);
    assert_eq!(h.database().analyze_runs(), 4);
}

/// Test: a single trial has a standard deviation of zero.
#[tokio::test]
async fn test_single_trial_aggregate() {
    let h = Harness::new();
    let plan = ExperimentPlan::new("single", SCAN, 1);
    let record = h.run("builtin", StrategySettings::default(), &plan).await;
    let agg = record.aggregate.unwrap();
    assert_eq!(agg.stddev_time_ms, 0.0);
    assert_eq!(agg.avg_time_ms, record.trials[0].execution_time_ms);
}

/// Recomputes on odd applications and purges `orders` on even ones
struct AlternatingStrategy {
    settings: StrategySettings,
    applications: AtomicUsize,
}

impl StatsStrategy for AlternatingStrategy {
    fn id(&self) -> &'static str {
        "alternating"
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn apply<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, StrategyResult<ApplyOutcome>> {
        Box::pin(async move {
            if self.applications.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                recompute(session, &self.settings).await?;
            } else {
                session
                    .delete_table_statistics(&TableRef::public("orders"))
                    .await?;
            }
            Ok(ApplyOutcome::plain(self.id()))
        })
    }
}

/// Scenario: statistics come and go between trials, so the plan flips
/// between index and sequential scans; divergence is flagged and the
/// experiment still succeeds.
#[tokio::test]
async fn test_divergent_plans_flagged_without_failing() {
    let h = Harness::new();
    let plan = ExperimentPlan::new("diverge", SCAN, 3);
    let strategy = AlternatingStrategy {
        settings: settings(ResetStrategy::PerTrial, TransactionMode::Rollback),
        applications: AtomicUsize::new(0),
    };
    let record = h
        .orchestrator()
        .run(&plan, &strategy, &mut NoopObserver, &StatusHandle::new())
        .await;

    assert_eq!(record.status, ExperimentStatus::Success, "{:?}", record.error);
    assert!(record.plans_diverged);
    assert_eq!(record.stats_applications, 3);
    let nodes: Vec<&str> = record
        .trials
        .iter()
        .map(|t| t.query_plan[0]["Plan"]["Node Type"].as_str().unwrap())
        .collect();
    assert_eq!(nodes, vec!["Index Scan", "Seq Scan", "Index Scan"]);
    assert!(record.aggregate.is_some());
}

/// Test: with statistics held steady the plan never diverges.
#[tokio::test]
async fn test_steady_statistics_do_not_diverge() {
    let h = Harness::new();
    let plan = ExperimentPlan::new("steady", SCAN, 3);
    let record = h
        .run(
            "builtin",
            settings(ResetStrategy::PerTrial, TransactionMode::Rollback),
            &plan,
        )
        .await;
    assert_eq!(record.status, ExperimentStatus::Success);
    assert!(!record.plans_diverged);
}

// =============================================================================
// TRANSACTION DISCIPLINE
// =============================================================================

async fn row_counts_after_each_trial(
    h: &Harness,
    mode: TransactionMode,
) -> (ExperimentRecord, Vec<u64>) {
    let plan = ExperimentPlan::new("insert", INSERT, 3);
    let counts = Arc::new(Mutex::new(Vec::new()));
    let sink = counts.clone();
    let cluster = h.cluster.clone();
    let mut observer = move |_: Uuid, m: &Milestone| {
        if let Milestone::TrialCompleted { .. } = m {
            let (_, db) = cluster.last_created().unwrap();
            sink.lock().unwrap().push(db.row_count("orders"));
        }
    };
    let record = h
        .run_with(
            "builtin",
            settings(ResetStrategy::Once, mode),
            &plan,
            &mut observer,
            &StatusHandle::new(),
        )
        .await;
    let counts = counts.lock().unwrap().clone();
    (record, counts)
}

/// Test: under "rollback" a mutating statement never changes the visible
/// row count.
#[tokio::test]
async fn test_rollback_leaves_row_count_unchanged() {
    let h = Harness::new();
    let (record, counts) = row_counts_after_each_trial(&h, TransactionMode::Rollback).await;
    assert_eq!(record.status, ExperimentStatus::Success);
    assert!(record.trials.iter().all(|t| t.rows == 5));
    assert_eq!(counts, vec![200, 200, 200]);
}

/// Test: under "persist" the effect accumulates across trials.
#[tokio::test]
async fn test_persist_accumulates() {
    let h = Harness::new();
    let (record, counts) = row_counts_after_each_trial(&h, TransactionMode::Persist).await;
    assert_eq!(record.status, ExperimentStatus::Success);
    assert_eq!(counts, vec![205, 210, 215]);
}

// =============================================================================
// FAILURE PATHS
// =============================================================================

/// Test: a provisioning failure ends in FAILURE without trials, and teardown
/// still drops the database.
#[tokio::test]
async fn test_provisioning_failure_still_tears_down() {
    let h = Harness::new();
    h.cluster.fail_create();
    let plan = ExperimentPlan::new("no db", SCAN, 3);
    let record = h.run("builtin", StrategySettings::default(), &plan).await;

    assert_eq!(record.status, ExperimentStatus::Failure);
    assert_eq!(
        record.error_code.as_deref(),
        Some("STATBENCH_EXPERIMENT_PROVISIONING")
    );
    assert!(record.error.is_some());
    assert!(record.trials.is_empty());
    assert_eq!(record.stats_applications, 0);
    assert!(record.aggregate.is_none());
    assert_eq!(h.cluster.dropped(), vec![plan.database.clone()]);
    assert_eq!(h.metrics.snapshot().experiments_failed, 1);
    assert!(record.logs.iter().any(|l| l.ends_with("teardown complete")));
}

/// Test: a failing dump load is a provisioning failure too.
#[tokio::test]
async fn test_dump_load_failure() {
    let h = Harness::new();
    h.cluster.fail_load();
    let mut plan = ExperimentPlan::new("bad dump", SCAN, 1);
    plan.dump_path = Some("/tmp/statbench-missing.sql".into());
    let record = h.run("builtin", StrategySettings::default(), &plan).await;

    assert_eq!(record.status, ExperimentStatus::Failure);
    assert_eq!(
        record.error_code.as_deref(),
        Some("STATBENCH_EXPERIMENT_PROVISIONING")
    );
    assert!(h.cluster.live_databases().is_empty());
}

/// Test: a statement timeout surfaces as a typed query-execution failure.
#[tokio::test]
async fn test_timeout_is_typed_failure() {
    let h = Harness::new();
    let plan = ExperimentPlan::new("slow", SLEEP, 2);
    let record = h.run("builtin", StrategySettings::default(), &plan).await;

    assert_eq!(record.status, ExperimentStatus::Failure);
    assert_eq!(
        record.error_code.as_deref(),
        Some("STATBENCH_EXPERIMENT_QUERY_TIMEOUT")
    );
    assert!(record.trials.is_empty());
    assert!(!h.database().in_transaction());
    assert!(h.cluster.live_databases().is_empty());
}

/// Test: cancellation between trials stops cleanly after the current trial.
#[tokio::test]
async fn test_cancel_between_trials() {
    let h = Harness::new();
    let plan = ExperimentPlan::new("cancel", SCAN, 5);
    let status = StatusHandle::new();
    let canceller = status.clone();
    let mut observer = move |_: Uuid, m: &Milestone| {
        if let Milestone::TrialCompleted { index: 2, .. } = m {
            canceller.cancel();
        }
    };
    let record = h
        .run_with(
            "builtin",
            StrategySettings::default(),
            &plan,
            &mut observer,
            &status,
        )
        .await;

    assert_eq!(record.status, ExperimentStatus::Failure);
    assert_eq!(
        record.error_code.as_deref(),
        Some("STATBENCH_EXPERIMENT_CANCELLED")
    );
    assert_eq!(record.trials.len(), 2);
    assert_eq!(status.view().completed_trials, 2);
    assert!(h.cluster.live_databases().is_empty());
}

// =============================================================================
// STRATEGY FALLBACK
// =============================================================================

/// Test: estimates that resolve to nothing degrade to the built-in
/// recompute; the experiment still succeeds and records the fallback.
#[tokio::test]
async fn test_estimate_driven_falls_back_to_builtin() {
    let h = Harness::new().with_estimates(json!([
        {"attname": "invoices.total", "null_frac": 0.2}
    ]));
    let plan = ExperimentPlan::new("fallback", SCAN, 2);
    let record = h.run("estimate_driven", StrategySettings::default(), &plan).await;

    assert_eq!(record.status, ExperimentStatus::Success);
    assert_eq!(record.strategy, "estimate_driven");
    assert_eq!(record.effective_strategy.as_deref(), Some("builtin"));
    assert_eq!(h.database().analyze_runs(), 1);
    assert_eq!(h.metrics.snapshot().strategy_fallbacks, 1);
}

/// Test: injected estimates are what the trials' snapshots show, and the
/// suppressed auto-refresh is back on afterwards.
#[tokio::test]
async fn test_estimate_driven_injection_visible_in_snapshots() {
    let h = Harness::new().with_estimates(json!([
        {
            "attname": "orders.amount",
            "null_frac": 0.25,
            "most_common_vals": ["10", "20"],
            "most_common_freqs": [0.3, 0.2],
            "histogram_bounds": ["1", "50", "100"]
        }
    ]));
    let plan = ExperimentPlan::new("inject", SCAN, 2);
    let record = h.run("estimate_driven", StrategySettings::default(), &plan).await;

    assert_eq!(record.status, ExperimentStatus::Success, "{:?}", record.error);
    assert!(record.effective_strategy.is_none());
    let db = h.database();
    assert_eq!(db.analyze_runs(), 0);
    assert!(db.auto_refresh_enabled("orders"));

    let planner = &record.trials[0].catalog_snapshot.planner;
    let amount = planner.iter().find(|r| r.column == "amount").unwrap();
    assert_eq!(amount.null_frac, Some(0.25));
    assert_eq!(amount.most_common_freqs, Some(vec![0.3, 0.2]));
    assert_eq!(
        amount.histogram_bounds.as_ref().map(|b| b.len()),
        Some(3)
    );
    assert_eq!(h.metrics.snapshot().estimates_accepted, 1);
}

// =============================================================================
// OBSERVERS, STATUS, LEDGER
// =============================================================================

/// Test: milestones arrive in lifecycle order and the observer sees
/// teardown last.
#[tokio::test]
async fn test_milestone_order() {
    let h = Harness::new();
    let plan = ExperimentPlan::new("milestones", SCAN, 2);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut observer = move |_: Uuid, m: &Milestone| {
        let name = match m {
            Milestone::Provisioned { .. } => "provisioned",
            Milestone::StatsApplied { .. } => "stats_applied",
            Milestone::TrialStarted { .. } => "trial_started",
            Milestone::TrialCompleted { .. } => "trial_completed",
            Milestone::Aggregated { .. } => "aggregated",
            Milestone::Finished { .. } => "finished",
            Milestone::TornDown => "torn_down",
        };
        sink.lock().unwrap().push(name);
    };
    let status = StatusHandle::new();
    let record = h
        .run_with(
            "builtin",
            StrategySettings::default(),
            &plan,
            &mut observer,
            &status,
        )
        .await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "provisioned",
            "stats_applied",
            "trial_started",
            "trial_completed",
            "trial_started",
            "trial_completed",
            "aggregated",
            "finished",
            "torn_down",
        ]
    );
    let view = status.view();
    assert_eq!(view.experiment, Some(record.id));
    assert_eq!(view.status, ExperimentStatus::Success);
    assert_eq!(view.completed_trials, 2);
    assert_eq!(view.stats_applications, 1);
}

/// Test: the file ledger holds the final record, trials included.
#[tokio::test]
async fn test_file_ledger_receives_final_record() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::new();
    h.ledger = Arc::new(FileLedger::open(dir.path()).unwrap());
    let plan = ExperimentPlan::new("ledger", SCAN, 2);
    let record = h.run("builtin", StrategySettings::default(), &plan).await;

    let stored = h.ledger.load(record.id).unwrap().unwrap();
    assert_eq!(stored.status, ExperimentStatus::Success);
    assert_eq!(stored.id, record.id);
    assert_eq!(stored.database, record.database);
    assert_eq!(stored.trials.len(), 2);
    assert_eq!(stored.logs, record.logs);
    assert!(stored.finished_at.is_some());
}
