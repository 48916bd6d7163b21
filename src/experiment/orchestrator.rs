//! # Trial Orchestrator
//!
//! CREATED → PROVISIONED → (STATS_APPLIED)* → TRIAL(1..N) → AGGREGATED →
//! SUCCESS | FAILURE → TEARDOWN
//!
//! Any error between provisioning and aggregation ends the experiment in
//! FAILURE with the error recorded. Teardown runs in every case: the
//! auto-refresh flags touched by the writer are restored, the session is
//! closed, the ephemeral database is dropped and the observer is released.
//!
//! Trials of one experiment run strictly in order. Cancellation is checked
//! between trials only.

use std::sync::Arc;

use chrono::Utc;

use super::config::ExperimentPlan;
use super::errors::{ExperimentError, ExperimentResult};
use super::ledger::ExperimentLedger;
use super::observer::{Milestone, ProgressObserver, StatusHandle};
use super::record::{aggregate, plan_cost, ExperimentRecord, ExperimentStatus, TrialRecord};
use crate::catalog::AutoRefreshLedger;
use crate::observability::{
    log_event_with_fields, Event, Logger, MetricsRegistry, ObservationScope, Timer,
};
use crate::session::{Connector, Provisioner, Session, TxControl};
use crate::strategy::{
    apply_knobs, clear_caches, ResetStrategy, StatsStrategy, StrategySettings, TransactionMode,
};

/// Per-run state: the record being built and the progress sinks
struct Run<'a> {
    record: ExperimentRecord,
    observer: &'a mut dyn ProgressObserver,
    status: &'a StatusHandle,
}

impl Run<'_> {
    fn milestone(&mut self, milestone: Milestone) {
        self.record.log(milestone.to_string());
        self.observer.on_milestone(self.record.id, &milestone);
    }

    fn ledger_failed(&mut self, operation: &str, error: &ExperimentError) {
        Logger::warn(
            "LEDGER_WRITE_FAILED",
            &[
                ("experiment", &self.record.id.to_string()),
                ("operation", operation),
                ("error", &error.to_string()),
            ],
        );
        self.record.log(format!("ledger {} failed: {}", operation, error));
    }
}

pub struct TrialOrchestrator {
    provisioner: Arc<dyn Provisioner>,
    connector: Arc<dyn Connector>,
    ledger: Arc<dyn ExperimentLedger>,
    metrics: Arc<MetricsRegistry>,
    auto_refresh: AutoRefreshLedger,
}

impl TrialOrchestrator {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        connector: Arc<dyn Connector>,
        ledger: Arc<dyn ExperimentLedger>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            provisioner,
            connector,
            ledger,
            metrics,
            auto_refresh: AutoRefreshLedger::new(),
        }
    }

    /// Share the auto-refresh ledger the strategy's writer records into, so
    /// teardown can restore what it disabled
    pub fn with_auto_refresh(mut self, auto_refresh: AutoRefreshLedger) -> Self {
        self.auto_refresh = auto_refresh;
        self
    }

    /// Run one experiment to a terminal state. Never returns early: every
    /// failure is captured on the returned record.
    pub async fn run(
        &self,
        plan: &ExperimentPlan,
        strategy: &dyn StatsStrategy,
        observer: &mut dyn ProgressObserver,
        status: &StatusHandle,
    ) -> ExperimentRecord {
        let settings = strategy.settings();
        let mut run = Run {
            record: ExperimentRecord::new(
                &plan.name,
                strategy.id(),
                &plan.query,
                &plan.database,
                plan.iterations,
                settings.stats_reset_strategy,
                settings.transaction_handling,
            ),
            observer,
            status,
        };
        let id = run.record.id;
        status.update(|v| {
            v.experiment = Some(id);
            v.phase = "CREATED";
            v.total_trials = plan.iterations;
            v.completed_trials = 0;
            v.stats_applications = 0;
            v.status = ExperimentStatus::Running;
            v.message = None;
        });
        log_event_with_fields(
            Event::ExperimentBegin,
            &[
                ("experiment", &id.to_string()),
                ("strategy", strategy.id()),
                ("iterations", &plan.iterations.to_string()),
                ("reset_strategy", settings.stats_reset_strategy.as_str()),
                ("transaction_mode", settings.transaction_handling.as_str()),
            ],
        );
        if let Err(e) = self.ledger.create(&run.record) {
            run.ledger_failed("create", &e);
        }

        let mut session = None;
        if let Err(error) = self.execute(plan, strategy, &mut session, &mut run).await {
            run.record.log(format!("{}: {}", error.code(), error));
            if let Err(sealed) = run.record.fail(&error) {
                Logger::warn("EXPERIMENT_ALREADY_SEALED", &[("error", &sealed.to_string())]);
            }
        }

        let final_status = run.record.status;
        match final_status {
            ExperimentStatus::Success => {
                self.metrics.increment_experiments_succeeded();
                log_event_with_fields(
                    Event::ExperimentSucceeded,
                    &[("experiment", &id.to_string())],
                );
            }
            _ => {
                self.metrics.increment_experiments_failed();
                log_event_with_fields(
                    Event::ExperimentFailed,
                    &[
                        ("experiment", &id.to_string()),
                        ("code", run.record.error_code.as_deref().unwrap_or("")),
                        ("error", run.record.error.as_deref().unwrap_or("")),
                    ],
                );
            }
        }
        run.milestone(Milestone::Finished {
            status: final_status,
        });
        let message = run.record.error.clone();
        status.update(|v| {
            v.status = final_status;
            v.message = message;
        });

        self.teardown(plan, session, &mut run).await;

        if let Err(e) = self.ledger.update(&run.record) {
            run.ledger_failed("update", &e);
        }
        run.record
    }

    async fn execute(
        &self,
        plan: &ExperimentPlan,
        strategy: &dyn StatsStrategy,
        slot: &mut Option<Box<dyn Session>>,
        run: &mut Run<'_>,
    ) -> ExperimentResult<()> {
        let settings = strategy.settings();

        run.status.set_phase("PROVISIONED");
        let connected = match self.provision(plan).await {
            Ok(session) => session,
            Err(e) => {
                log_event_with_fields(
                    Event::ProvisionFailed,
                    &[("database", &plan.database), ("error", &e.to_string())],
                );
                return Err(e);
            }
        };
        let session: &mut dyn Session = slot.insert(connected).as_mut();
        apply_knobs(session, settings).await?;
        run.milestone(Milestone::Provisioned {
            database: plan.database.clone(),
        });

        for index in 1..=plan.iterations {
            if run.status.is_cancelled() {
                log_event_with_fields(
                    Event::ExperimentCancelled,
                    &[("completed_trials", &(index - 1).to_string())],
                );
                return Err(ExperimentError::Cancelled { completed: index - 1 });
            }

            if index == 1 || settings.stats_reset_strategy == ResetStrategy::PerTrial {
                run.status.set_phase("STATS_APPLIED");
                self.apply_stats(strategy, session, run).await?;
            }

            run.status.set_phase("TRIAL");
            run.milestone(Milestone::TrialStarted { index });
            let trial = self.run_trial(index, &plan.query, settings, session).await?;
            self.metrics.increment_trials_run();
            run.milestone(Milestone::TrialCompleted {
                index,
                execution_time_ms: trial.execution_time_ms,
            });
            if let Err(e) = self.ledger.append_trial(run.record.id, &trial) {
                run.ledger_failed("append_trial", &e);
            }
            run.record.append_trial(trial)?;
            run.status.update(|v| v.completed_trials = index);
        }

        run.status.set_phase("AGGREGATED");
        let summary = aggregate(&run.record.execution_times());
        let diverged = run.record.detect_plan_divergence();
        if diverged {
            log_event_with_fields(
                Event::PlanDivergence,
                &[("experiment", &run.record.id.to_string())],
            );
            run.record.log("query plans differ between trials");
        }
        if let Some(s) = summary {
            log_event_with_fields(
                Event::ExperimentAggregated,
                &[
                    ("avg_ms", &format!("{:.3}", s.avg_time_ms)),
                    ("stddev_ms", &format!("{:.3}", s.stddev_time_ms)),
                    ("min_ms", &format!("{:.3}", s.min_time_ms)),
                    ("max_ms", &format!("{:.3}", s.max_time_ms)),
                ],
            );
            run.milestone(Milestone::Aggregated {
                avg_time_ms: s.avg_time_ms,
                stddev_time_ms: s.stddev_time_ms,
            });
        }
        run.record.succeed(summary, diverged)
    }

    /// Create, seed and connect
    async fn provision(&self, plan: &ExperimentPlan) -> ExperimentResult<Box<dyn Session>> {
        log_event_with_fields(Event::ProvisionBegin, &[("database", &plan.database)]);
        self.provisioner
            .create(&plan.database)
            .await
            .map_err(ExperimentError::Provisioning)?;
        if let Some(dump) = &plan.dump_path {
            self.provisioner
                .load(&plan.database, dump)
                .await
                .map_err(ExperimentError::Provisioning)?;
            log_event_with_fields(
                Event::DumpLoaded,
                &[
                    ("database", &plan.database),
                    ("dump", &dump.display().to_string()),
                ],
            );
        }
        let session = self
            .connector
            .connect(&plan.database)
            .await
            .map_err(ExperimentError::Provisioning)?;
        log_event_with_fields(Event::ProvisionComplete, &[("database", &plan.database)]);
        Ok(session)
    }

    async fn apply_stats(
        &self,
        strategy: &dyn StatsStrategy,
        session: &mut dyn Session,
        run: &mut Run<'_>,
    ) -> ExperimentResult<()> {
        let scope = ObservationScope::with_fields("STATS_APPLY", &[("strategy", strategy.id())]);
        let outcome = match strategy.apply(session).await {
            Ok(outcome) => outcome,
            Err(e) => {
                scope.fail(&e.to_string());
                return Err(ExperimentError::StatsApplication(e));
            }
        };
        scope.complete();

        self.metrics.increment_stats_applications();
        run.record
            .record_application(outcome.degraded.then_some(outcome.strategy.as_str()))?;
        let application = run.record.stats_applications;
        run.status.update(|v| v.stats_applications = application);
        if let Some(note) = &outcome.note {
            run.record.log(format!("{}: {}", outcome.strategy, note));
        }
        log_event_with_fields(
            Event::StatsApplied,
            &[
                ("strategy", &outcome.strategy),
                ("degraded", &outcome.degraded.to_string()),
                ("application", &application.to_string()),
            ],
        );
        run.milestone(Milestone::StatsApplied {
            application,
            strategy: outcome.strategy,
            degraded: outcome.degraded,
        });
        Ok(())
    }

    async fn run_trial(
        &self,
        index: usize,
        query: &str,
        settings: &StrategySettings,
        session: &mut dyn Session,
    ) -> ExperimentResult<TrialRecord> {
        let trial = index.to_string();
        let scope = ObservationScope::with_fields("TRIAL", &[("trial", &trial)]);
        match trial_body(index, query, settings, session).await {
            Ok(record) => {
                scope.complete_with_fields(&[
                    ("execution_ms", &format!("{:.3}", record.execution_time_ms)),
                    ("cost", &record.cost_estimate.to_string()),
                    ("rows", &record.rows.to_string()),
                ]);
                Ok(record)
            }
            Err(e) => {
                scope.fail(&format!("{} ({})", e, e.code()));
                Err(e)
            }
        }
    }

    async fn teardown(
        &self,
        plan: &ExperimentPlan,
        session: Option<Box<dyn Session>>,
        run: &mut Run<'_>,
    ) {
        run.status.set_phase("TEARDOWN");
        let scope = ObservationScope::with_fields("TEARDOWN", &[("database", &plan.database)]);
        let mut failed_steps = 0usize;

        if let Some(mut session) = session {
            // Leave any transaction a failed step left open
            if let Err(e) = session.transaction(TxControl::Rollback).await {
                Logger::trace("TEARDOWN_ROLLBACK", &[("error", &e.to_string())]);
            }
            match self.auto_refresh.restore_all(session.as_mut()).await {
                Ok(0) => {}
                Ok(n) => run.record.log(format!("auto-refresh restored on {} tables", n)),
                Err(e) => {
                    failed_steps += 1;
                    step_failed(run, "restore_auto_refresh", &e.to_string());
                }
            }
        }

        if let Err(e) = self.provisioner.drop_database(&plan.database).await {
            failed_steps += 1;
            step_failed(run, "drop_database", &e.to_string());
        }

        scope.complete_with_fields(&[("failed_steps", &failed_steps.to_string())]);
        run.milestone(Milestone::TornDown);
    }
}

fn step_failed(run: &mut Run<'_>, step: &str, error: &str) {
    log_event_with_fields(Event::TeardownStepFailed, &[("step", step), ("error", error)]);
    run.record.log(format!("teardown step {} failed: {}", step, error));
}

/// Reset, probe, execute under the configured transaction discipline,
/// snapshot
async fn trial_body(
    index: usize,
    query: &str,
    settings: &StrategySettings,
    session: &mut dyn Session,
) -> ExperimentResult<TrialRecord> {
    let started_at = Utc::now();
    if settings.clear_caches || settings.reset_counters {
        clear_caches(session, settings).await?;
    }

    let query_plan = session
        .explain(query)
        .await
        .map_err(|source| ExperimentError::QueryExecution {
            trial: index,
            source,
        })?;
    let cost_estimate = plan_cost(&query_plan);

    session.transaction(TxControl::Begin).await?;
    let timer = Timer::new();
    let executed = session.execute(query).await;
    let execution_time_ms = timer.elapsed_millis_f64();
    let rows = match executed {
        Ok(rows) => rows,
        Err(source) => {
            if let Err(e) = session.transaction(TxControl::Rollback).await {
                Logger::warn("TRIAL_ROLLBACK_FAILED", &[("error", &e.to_string())]);
            }
            return Err(ExperimentError::QueryExecution {
                trial: index,
                source,
            });
        }
    };
    let end = match settings.transaction_handling {
        TransactionMode::Rollback => TxControl::Rollback,
        TransactionMode::Persist => TxControl::Commit,
    };
    session.transaction(end).await?;

    let catalog_snapshot = session.snapshot().await?;
    Ok(TrialRecord {
        index,
        started_at,
        execution_time_ms,
        cost_estimate,
        query_plan,
        rows,
        catalog_snapshot,
    })
}
