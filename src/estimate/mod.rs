//! # Estimates
//!
//! Intake of per-column statistics estimates: the schema they are checked
//! against, providers that produce them, parsing of their loose formats and
//! the sanitizer that makes them safe to translate.

mod errors;
mod parse;
mod provider;
mod sanitizer;
mod schema;
mod types;

pub use errors::{EstimateError, EstimateResult};
pub use parse::{parse_number, parse_numbers, parse_values, split_identifier, ColumnRef};
pub use provider::{parse_document, EstimateProvider, FileEstimateProvider, StaticEstimateProvider};
pub use sanitizer::{
    reconcile_mcv, summarize, AmbiguityPolicy, DroppedEstimate, SanitizeReport, Sanitizer,
    TableSummary, DEFAULT_AVG_WIDTH,
};
pub use schema::{ColumnInfo, SchemaInfo, TableInfo};
pub use types::{ColumnEstimate, RawEstimate, StatValue};
