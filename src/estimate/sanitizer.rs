//! # Estimate Sanitizer
//!
//! Turns untrusted provider rows into [`ColumnEstimate`]s that respect the
//! catalog's value ranges. Nothing downstream re-checks these rules.
//!
//! Per row:
//! 1. Resolve the column against the live schema. A bare column name is
//!    inferred from the unique table that has it.
//! 2. Parse every field (numbers, JSON arrays, array literals).
//! 3. Clamp: `null_frac` to [0, 1], `correlation` to [-1, 1], positive
//!    `n_distinct` to the table's row count, negative `n_distinct` to
//!    [-1, 0), `avg_width` to at least 1.
//! 4. Reconcile MCV values against frequencies (truncate to the shorter,
//!    drop null values, zero bad frequencies, renormalize when the sum
//!    exceeds 1). Histograms need at least two non-null bounds.
//!
//! Rows that cannot be resolved, carry no statistic, or repeat an already
//! accepted column are dropped and reported.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{EstimateError, EstimateResult};
use super::parse::{parse_number, parse_numbers, parse_values, split_identifier, ColumnRef};
use super::schema::{SchemaInfo, TableInfo};
use super::types::{ColumnEstimate, RawEstimate};
use crate::observability::{log_event_with_fields, Event};

/// `avg_width` when the provider gives none
pub const DEFAULT_AVG_WIDTH: i32 = 4;

/// What to do with a bare column name that several tables have
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Treat it as unresolved
    #[default]
    Drop,
    /// Use the first table in schema order
    FirstMatch,
}

/// A rejected row
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedEstimate {
    pub label: String,
    pub error: EstimateError,
}

/// Sanitizer output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizeReport {
    pub estimates: Vec<ColumnEstimate>,
    pub dropped: Vec<DroppedEstimate>,
}

/// Per-table counts of populated statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub columns: usize,
    pub with_null_frac: usize,
    pub with_n_distinct: usize,
    pub with_mcv: usize,
    pub with_histogram: usize,
    pub with_correlation: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sanitizer {
    policy: AmbiguityPolicy,
}

impl Sanitizer {
    pub fn new(policy: AmbiguityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AmbiguityPolicy {
        self.policy
    }

    /// Validate and clamp `raw` against `schema`
    pub fn validate(&self, raw: &[RawEstimate], schema: &SchemaInfo) -> SanitizeReport {
        let mut report = SanitizeReport::default();
        let mut seen = HashSet::new();

        for row in raw {
            let label = row.label();
            let result = self.sanitize_one(row, schema).and_then(|estimate| {
                let key = (
                    estimate.schema.clone(),
                    estimate.table.clone(),
                    estimate.column.clone(),
                );
                if seen.insert(key) {
                    Ok(estimate)
                } else {
                    Err(EstimateError::Duplicate(estimate.label()))
                }
            });
            match result {
                Ok(estimate) => report.estimates.push(estimate),
                Err(error) => {
                    log_event_with_fields(
                        Event::EstimateDropped,
                        &[
                            ("estimate", &label),
                            ("code", error.code()),
                            ("reason", &error.to_string()),
                        ],
                    );
                    report.dropped.push(DroppedEstimate { label, error });
                }
            }
        }

        log_event_with_fields(
            Event::EstimatesSanitized,
            &[
                ("received", &raw.len().to_string()),
                ("accepted", &report.estimates.len().to_string()),
                ("dropped", &report.dropped.len().to_string()),
            ],
        );
        report
    }

    fn resolve<'s>(
        &self,
        row: &RawEstimate,
        schema: &'s SchemaInfo,
    ) -> EstimateResult<(&'s TableInfo, String)> {
        let label = row.label();
        let reference = match (&row.attname, &row.column) {
            (Some(attname), _) => split_identifier(attname),
            (None, Some(column)) => split_identifier(column),
            (None, None) => None,
        }
        .ok_or_else(|| EstimateError::Parse {
            label: label.clone(),
            message: "no column identifier".to_string(),
        })?;

        let ColumnRef {
            schema: ref_schema,
            table: ref_table,
            column,
        } = reference;
        let schema_name = ref_schema.or_else(|| row.schema.clone());
        let table_name = ref_table.or_else(|| row.table.clone());

        let table = match table_name {
            Some(name) => schema
                .table(schema_name.as_deref(), &name)
                .ok_or_else(|| EstimateError::SchemaResolution(format!("table {}", name)))?,
            None => {
                let candidates: Vec<&TableInfo> = schema
                    .tables_with_column(&column)
                    .into_iter()
                    .filter(|t| schema_name.as_deref().map_or(true, |s| t.schema == s))
                    .collect();
                match candidates.as_slice() {
                    [] => {
                        return Err(EstimateError::SchemaResolution(format!(
                            "column {}",
                            column
                        )))
                    }
                    [only] => *only,
                    [first, ..] => match self.policy {
                        AmbiguityPolicy::FirstMatch => *first,
                        AmbiguityPolicy::Drop => {
                            let tables: Vec<&str> =
                                candidates.iter().map(|t| t.name.as_str()).collect();
                            return Err(EstimateError::Ambiguous {
                                column,
                                tables: tables.join(", "),
                            });
                        }
                    },
                }
            }
        };

        let column = table
            .column(&column)
            .ok_or_else(|| {
                EstimateError::SchemaResolution(format!("column {}.{}", table.name, column))
            })?
            .name
            .clone();
        Ok((table, column))
    }

    fn sanitize_one(&self, row: &RawEstimate, schema: &SchemaInfo) -> EstimateResult<ColumnEstimate> {
        let (table, column) = self.resolve(row, schema)?;
        let mut estimate = ColumnEstimate::new(&table.schema, &table.name, &column);
        let label = estimate.label();
        let number = |v: &Option<Value>| v.as_ref().and_then(parse_number);
        let parse_err = |field: &str, message: String| EstimateError::Parse {
            label: label.clone(),
            message: format!("{}: {}", field, message),
        };

        let null_frac = number(&row.null_frac);
        let avg_width = number(&row.avg_width);
        let n_distinct = number(&row.n_distinct);
        let correlation = number(&row.correlation);

        let vals = match &row.most_common_vals {
            Some(v) => parse_values(v).map_err(|m| parse_err("most_common_vals", m))?,
            None => Vec::new(),
        };
        let freqs = match &row.most_common_freqs {
            Some(v) => parse_numbers(v).map_err(|m| parse_err("most_common_freqs", m))?,
            None => Vec::new(),
        };
        let bounds = match &row.histogram_bounds {
            Some(v) => parse_values(v).map_err(|m| parse_err("histogram_bounds", m))?,
            None => Vec::new(),
        };

        estimate.null_frac = null_frac.map_or(0.0, |f| f.clamp(0.0, 1.0));
        estimate.avg_width = avg_width.map_or(DEFAULT_AVG_WIDTH, clamp_width);
        estimate.n_distinct = n_distinct.map_or(0.0, |n| clamp_distinct(n, table.known_rows()));
        estimate.correlation = correlation.map(|c| c.clamp(-1.0, 1.0));

        let (mcv_vals, mcv_freqs) = reconcile_mcv(vals, freqs);
        estimate.most_common_vals = mcv_vals;
        estimate.most_common_freqs = mcv_freqs;

        let bounds: Vec<String> = bounds.into_iter().flatten().collect();
        if bounds.len() >= 2 {
            estimate.histogram_bounds = bounds;
        }

        let populated = null_frac.is_some()
            || avg_width.is_some()
            || n_distinct.is_some()
            || correlation.is_some()
            || estimate.has_mcv()
            || estimate.has_histogram();
        if !populated {
            return Err(EstimateError::NoStatistics(label));
        }
        Ok(estimate)
    }
}

fn clamp_width(width: f64) -> i32 {
    width.round().clamp(1.0, i32::MAX as f64) as i32
}

/// Positive: at most the row count (when known). Negative: within [-1, 0).
fn clamp_distinct(n: f64, known_rows: Option<f64>) -> f64 {
    if n > 0.0 {
        match known_rows {
            Some(rows) => n.min(rows),
            None => n,
        }
    } else if n < 0.0 {
        n.max(-1.0)
    } else {
        0.0
    }
}

/// Pair values with frequencies, truncating to the shorter list. Pairs with
/// a null value are removed; missing, negative or non-finite frequencies
/// become 0. Frequencies summing past 1 are scaled down proportionally.
pub fn reconcile_mcv(vals: Vec<Option<String>>, freqs: Vec<Option<f64>>) -> (Vec<String>, Vec<f64>) {
    let (vals, mut freqs): (Vec<String>, Vec<f64>) = vals
        .into_iter()
        .zip(freqs)
        .filter_map(|(v, f)| {
            let f = f.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(0.0);
            v.map(|v| (v, f))
        })
        .unzip();
    let sum: f64 = freqs.iter().sum();
    if sum > 1.0 {
        for f in freqs.iter_mut() {
            *f /= sum;
        }
    }
    (vals, freqs)
}

/// Per-table counts of populated statistics, ordered by table name
pub fn summarize(estimates: &[ColumnEstimate]) -> Vec<TableSummary> {
    let mut tables: BTreeMap<&str, TableSummary> = BTreeMap::new();
    for e in estimates {
        let s = tables.entry(&e.table).or_insert_with(|| TableSummary {
            table: e.table.clone(),
            ..TableSummary::default()
        });
        s.columns += 1;
        if e.null_frac > 0.0 {
            s.with_null_frac += 1;
        }
        if e.n_distinct != 0.0 {
            s.with_n_distinct += 1;
        }
        if e.has_mcv() {
            s.with_mcv += 1;
        }
        if e.has_histogram() {
            s.with_histogram += 1;
        }
        if e.correlation.is_some() {
            s.with_correlation += 1;
        }
    }
    tables.into_values().collect()
}
