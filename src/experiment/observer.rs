//! Progress reporting
//!
//! Observers get a synchronous callback at each milestone. A
//! [`StatusHandle`] is the polling side: one per experiment, shared between
//! the orchestrator and whoever reads progress or asks for cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use super::record::ExperimentStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum Milestone {
    Provisioned { database: String },
    StatsApplied { application: usize, strategy: String, degraded: bool },
    TrialStarted { index: usize },
    TrialCompleted { index: usize, execution_time_ms: f64 },
    Aggregated { avg_time_ms: f64, stddev_time_ms: f64 },
    Finished { status: ExperimentStatus },
    TornDown,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Milestone::Provisioned { database } => write!(f, "database {} provisioned", database),
            Milestone::StatsApplied {
                application,
                strategy,
                degraded,
            } => {
                write!(f, "statistics applied (#{}) by {}", application, strategy)?;
                if *degraded {
                    write!(f, " after fallback")?;
                }
                Ok(())
            }
            Milestone::TrialStarted { index } => write!(f, "trial {} started", index),
            Milestone::TrialCompleted {
                index,
                execution_time_ms,
            } => write!(f, "trial {} completed in {:.3} ms", index, execution_time_ms),
            Milestone::Aggregated {
                avg_time_ms,
                stddev_time_ms,
            } => write!(f, "avg {:.3} ms, stddev {:.3} ms", avg_time_ms, stddev_time_ms),
            Milestone::Finished { status } => write!(f, "experiment {}", status.as_str()),
            Milestone::TornDown => write!(f, "teardown complete"),
        }
    }
}

pub trait ProgressObserver: Send {
    fn on_milestone(&mut self, experiment: Uuid, milestone: &Milestone);
}

impl<F> ProgressObserver for F
where
    F: FnMut(Uuid, &Milestone) + Send,
{
    fn on_milestone(&mut self, experiment: Uuid, milestone: &Milestone) {
        self(experiment, milestone)
    }
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_milestone(&mut self, _: Uuid, _: &Milestone) {}
}

/// Point-in-time progress of one experiment
#[derive(Debug, Clone, PartialEq)]
pub struct StatusView {
    pub experiment: Option<Uuid>,
    pub phase: &'static str,
    pub completed_trials: usize,
    pub total_trials: usize,
    pub stats_applications: usize,
    pub status: ExperimentStatus,
    pub message: Option<String>,
}

#[derive(Debug)]
struct StatusInner {
    cancel: AtomicBool,
    view: Mutex<StatusView>,
}

/// Shared progress and cancellation state, scoped to one experiment
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<StatusInner>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatusInner {
                cancel: AtomicBool::new(false),
                view: Mutex::new(StatusView {
                    experiment: None,
                    phase: "CREATED",
                    completed_trials: 0,
                    total_trials: 0,
                    stats_applications: 0,
                    status: ExperimentStatus::Running,
                    message: None,
                }),
            }),
        }
    }

    /// Ask the orchestrator to stop before the next trial
    pub fn cancel(&self) {
        self.inner.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.load(Ordering::SeqCst)
    }

    pub fn view(&self) -> StatusView {
        self.inner
            .view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut StatusView)) {
        let mut view = self.inner.view.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut view);
    }

    pub(crate) fn set_phase(&self, phase: &'static str) {
        self.update(|v| v.phase = phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_observer() {
        let mut seen = Vec::new();
        {
            let mut observer = |_: Uuid, m: &Milestone| seen.push(m.to_string());
            observer.on_milestone(Uuid::nil(), &Milestone::TrialStarted { index: 1 });
            observer.on_milestone(Uuid::nil(), &Milestone::TornDown);
        }
        assert_eq!(seen, vec!["trial 1 started", "teardown complete"]);
    }

    #[test]
    fn test_status_handle_shared() {
        let handle = StatusHandle::new();
        let reader = handle.clone();
        handle.set_phase("TRIAL");
        handle.update(|v| v.completed_trials = 2);
        assert_eq!(reader.view().phase, "TRIAL");
        assert_eq!(reader.view().completed_trials, 2);

        assert!(!handle.is_cancelled());
        reader.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_milestone_display() {
        let m = Milestone::StatsApplied {
            application: 1,
            strategy: "builtin".into(),
            degraded: true,
        };
        assert_eq!(m.to_string(), "statistics applied (#1) by builtin after fallback");
    }
}
