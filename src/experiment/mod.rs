//! # Experiments
//!
//! An experiment provisions an ephemeral database, puts statistics in place
//! with one strategy and runs the same statement N times, recording timing,
//! plan and catalog snapshot per trial.
//!
//! - `record`: experiment/trial records and aggregation
//! - `ledger`: where records are kept
//! - `observer`: milestone callbacks, status polling, cancellation
//! - `orchestrator`: the state machine

mod config;
mod errors;
mod ledger;
mod observer;
mod orchestrator;
mod record;

pub use config::{generate_database_name, ExperimentConfig, ExperimentPlan};
pub use errors::{ExperimentError, ExperimentResult};
pub use ledger::{ExperimentLedger, FileLedger, MemoryLedger};
pub use observer::{Milestone, NoopObserver, ProgressObserver, StatusHandle, StatusView};
pub use orchestrator::TrialOrchestrator;
pub use record::{
    aggregate, plan_cost, plan_shape, Aggregate, ExperimentRecord, ExperimentStatus, TrialRecord,
};
