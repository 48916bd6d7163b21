//! Estimate Sanitizer Tests
//!
//! Untrusted estimate rows in, range-checked column estimates out.
//!
//! Test Categories:
//! 1. Range invariants over arbitrary inputs
//! 2. MCV reconciliation
//! 3. Schema resolution and table inference

use serde_json::{json, Value};

use statbench::estimate::{
    AmbiguityPolicy, ColumnInfo, RawEstimate, Sanitizer, SchemaInfo, TableInfo,
};

fn table(name: &str, rows: f64, columns: &[&str]) -> TableInfo {
    TableInfo {
        schema: "public".into(),
        name: name.into(),
        row_count: rows,
        columns: columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.to_string(),
                data_type: "integer".into(),
            })
            .collect(),
    }
}

fn schema() -> SchemaInfo {
    SchemaInfo::new(vec![
        table("orders", 1000.0, &["id", "amount", "customer_id"]),
        table("customers", 50.0, &["id", "region"]),
    ])
}

fn raw(value: Value) -> RawEstimate {
    serde_json::from_value(value).unwrap()
}

// =============================================================================
// RANGE INVARIANTS
// =============================================================================

/// Test: null_frac and correlation always land in range, whatever came in.
#[test]
fn test_ranges_hold_for_arbitrary_inputs() {
    let inputs = [-3.0, -1.5, -0.2, 0.0, 0.4, 1.0, 1.4, 7.0];
    let rows: Vec<RawEstimate> = inputs
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let column = ["id", "amount", "customer_id"][i % 3];
            let table = if i < 3 { "orders" } else { "customers" };
            let column = if table == "customers" {
                ["id", "region"][i % 2]
            } else {
                column
            };
            raw(json!({
                "table": table,
                "column": column,
                "null_frac": v,
                "correlation": v,
                "n_distinct": v * 100.0,
            }))
        })
        .collect();

    // Duplicates are dropped; everything accepted must satisfy the ranges
    let report = Sanitizer::default().validate(&rows, &schema());
    assert!(!report.estimates.is_empty());
    for e in &report.estimates {
        assert!((0.0..=1.0).contains(&e.null_frac), "{}", e.label());
        if let Some(c) = e.correlation {
            assert!((-1.0..=1.0).contains(&c), "{}", e.label());
        }
        assert!(e.avg_width >= 1);
        if e.n_distinct < 0.0 {
            assert!(e.n_distinct >= -1.0);
        }
    }
}

/// Scenario: null_frac 1.4 on orders.amount becomes 1.0.
#[test]
fn test_null_frac_clamped_scenario() {
    let report = Sanitizer::default().validate(
        &[raw(json!({"table": "orders", "column": "amount", "null_frac": 1.4}))],
        &schema(),
    );
    assert_eq!(report.estimates.len(), 1);
    assert_eq!(report.estimates[0].null_frac, 1.0);
}

/// Test: positive distinct counts are capped at the table's row count.
#[test]
fn test_n_distinct_capped_at_row_count() {
    let report = Sanitizer::default().validate(
        &[
            raw(json!({"attname": "customers.region", "n_distinct": 5000})),
            raw(json!({"attname": "orders.customer_id", "n_distinct": -4.0})),
        ],
        &schema(),
    );
    assert_eq!(report.estimates[0].n_distinct, 50.0);
    assert_eq!(report.estimates[1].n_distinct, -1.0);
}

// =============================================================================
// MCV RECONCILIATION
// =============================================================================

/// Scenario: frequencies [0.7, 0.7] are renormalized to [0.5, 0.5].
#[test]
fn test_freqs_renormalized_scenario() {
    let report = Sanitizer::default().validate(
        &[raw(json!({
            "attname": "orders.amount",
            "most_common_vals": ["10", "20"],
            "most_common_freqs": [0.7, 0.7]
        }))],
        &schema(),
    );
    let e = &report.estimates[0];
    assert_eq!(e.most_common_freqs.len(), 2);
    assert!((e.most_common_freqs[0] - 0.5).abs() < 1e-9);
    assert!((e.most_common_freqs[1] - 0.5).abs() < 1e-9);
}

/// Test: mismatched lengths are truncated to the shorter list and the
/// result never sums above 1.
#[test]
fn test_mcv_lengths_always_match() {
    let cases = [
        (json!(["1", "2", "3"]), json!([0.5, 0.4])),
        (json!("{1,2}"), json!("{0.9,0.9,0.9}")),
        (json!(["a"]), json!([0.2, 0.2, 0.2])),
        (json!([]), json!([0.3])),
    ];
    for (vals, freqs) in cases {
        let report = Sanitizer::default().validate(
            &[raw(json!({
                "attname": "orders.amount",
                "null_frac": 0.1,
                "most_common_vals": vals,
                "most_common_freqs": freqs
            }))],
            &schema(),
        );
        let e = &report.estimates[0];
        assert_eq!(e.most_common_vals.len(), e.most_common_freqs.len());
        let sum: f64 = e.most_common_freqs.iter().sum();
        assert!(sum <= 1.0 + 1e-9, "sum {}", sum);
    }
}

// =============================================================================
// SCHEMA RESOLUTION
// =============================================================================

/// Test: unknown tables and columns are dropped, not fatal.
#[test]
fn test_unresolvable_rows_dropped() {
    let report = Sanitizer::default().validate(
        &[
            raw(json!({"attname": "ghosts.id", "null_frac": 0.1})),
            raw(json!({"attname": "orders.nope", "null_frac": 0.1})),
            raw(json!({"attname": "orders.amount", "null_frac": 0.1})),
        ],
        &schema(),
    );
    assert_eq!(report.estimates.len(), 1);
    assert_eq!(report.dropped.len(), 2);
    for d in &report.dropped {
        assert_eq!(d.error.code(), "STATBENCH_ESTIMATE_SCHEMA_RESOLUTION");
    }
}

/// Test: a row with nothing populated is dropped.
#[test]
fn test_row_without_statistics_dropped() {
    let report = Sanitizer::default().validate(
        &[raw(json!({"attname": "orders.amount", "null_frac": "NULL"}))],
        &schema(),
    );
    assert!(report.estimates.is_empty());
    assert_eq!(report.dropped[0].error.code(), "STATBENCH_ESTIMATE_NO_STATISTICS");
}

/// Test: a bare column name resolves when exactly one table has it.
#[test]
fn test_unique_column_inference() {
    let report = Sanitizer::default().validate(
        &[raw(json!({"attname": "region", "null_frac": 0.2}))],
        &schema(),
    );
    assert_eq!(report.estimates[0].table, "customers");
}

/// Test: an ambiguous bare column is dropped unless first-match is asked for.
#[test]
fn test_ambiguous_column_policy() {
    let rows = [raw(json!({"attname": "id", "null_frac": 0.0, "n_distinct": -1}))];

    let dropped = Sanitizer::new(AmbiguityPolicy::Drop).validate(&rows, &schema());
    assert!(dropped.estimates.is_empty());
    assert_eq!(dropped.dropped[0].error.code(), "STATBENCH_ESTIMATE_AMBIGUOUS");

    let first = Sanitizer::new(AmbiguityPolicy::FirstMatch).validate(&rows, &schema());
    assert_eq!(first.estimates[0].table, "orders");
}
