//! # Statistics Strategies
//!
//! Pluggable policies for where the planner's statistics come from:
//!
//! - `builtin`: the server's full recompute
//! - `empty`: caches cleared, nothing computed
//! - `estimate_driven`: sanitized external estimates injected into the
//!   catalog, degrading to `builtin` when nothing usable comes through
//! - `random_target`: random per-column sample sizes, then `builtin`

mod base;
mod builtin;
mod errors;
mod estimate_driven;
mod random_target;
mod registry;
mod settings;

pub use base::{apply_knobs, clear_caches, recompute, ApplyOutcome, StatsStrategy};
pub use builtin::{BuiltInStrategy, EmptyStrategy};
pub use errors::{StrategyError, StrategyResult};
pub use estimate_driven::EstimateDrivenStrategy;
pub use random_target::RandomTargetStrategy;
pub use registry::{Constructor, StrategyContext, StrategyRegistry};
pub use settings::{
    ResetStrategy, StrategySettings, TransactionMode, COST_CONSTANTS, MAX_STATISTICS_TARGET,
    MIN_STATISTICS_TARGET,
};
