//! statbench - benchmark how planner statistics strategies affect
//! PostgreSQL execution plans and timing
//!
//! - `estimate`: untrusted per-column estimates and their sanitizer
//! - `catalog`: `pg_statistic` rows, translation, encoding and writing
//! - `session`: the database seam (PostgreSQL and in-memory)
//! - `strategy`: where statistics come from
//! - `experiment`: provisioning, trials, records

pub mod catalog;
pub mod cli;
pub mod estimate;
pub mod experiment;
pub mod observability;
pub mod pgtext;
pub mod session;
pub mod strategy;
