//! Catalog Injection Tests
//!
//! Sanitized estimates → translated five-slot rows → catalog, against the
//! in-memory database.
//!
//! Test Categories:
//! 1. Slot allocation
//! 2. Round-trip verification
//! 3. Idempotence
//! 4. Field-level failure isolation

use std::sync::Arc;

use serde_json::json;

use statbench::catalog::{
    AutoRefreshLedger, CatalogSlotRow, CatalogWriter, EncodingTechnique, FieldStatus, StatsKind,
    Translator, WriterOptions, SLOT_COUNT,
};
use statbench::estimate::{ColumnEstimate, RawEstimate, Sanitizer, SchemaInfo};
use statbench::observability::MetricsRegistry;
use statbench::session::{MemoryDatabase, Session};

fn database() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_table(
            "orders",
            1000,
            &[
                ("id", "integer"),
                ("amount", "numeric"),
                ("note", "text"),
                ("payload", "json"),
            ],
        )
        .with_table("customers", 40, &[("id", "integer"), ("active", "boolean")])
}

fn raw_rows() -> Vec<RawEstimate> {
    serde_json::from_value(json!([
        {
            "attname": "orders.amount",
            "null_frac": 0.05,
            "avg_width": 6,
            "n_distinct": -0.4,
            "most_common_vals": ["10.00", "25.50", "99.99"],
            "most_common_freqs": [0.2, 0.1, 0.05],
            "histogram_bounds": ["0.50", "12.00", "40.00", "500.00"],
            "correlation": 0.31
        },
        {
            "attname": "orders.note",
            "null_frac": 0.4,
            "most_common_vals": "{hello,\"two words\"}",
            "most_common_freqs": "{0.3,0.2}",
            "histogram_bounds": ["a", "m", "z"]
        },
        {
            "attname": "orders.payload",
            "null_frac": 0.9,
            "most_common_vals": ["{}"],
            "most_common_freqs": [0.1]
        },
        {
            "attname": "customers.active",
            "n_distinct": 2,
            "most_common_vals": ["t", "f"],
            "most_common_freqs": [0.8, 0.2],
            "correlation": -0.2
        }
    ]))
    .unwrap()
}

async fn sanitized(db: &mut MemoryDatabase) -> Vec<ColumnEstimate> {
    let schema: SchemaInfo = db.describe_schema().await.unwrap();
    let report = Sanitizer::default().validate(&raw_rows(), &schema);
    assert!(report.dropped.is_empty());
    report.estimates
}

async fn translated(db: &mut MemoryDatabase) -> Vec<CatalogSlotRow> {
    let estimates = sanitized(db).await;
    let outcome = Translator::new().translate(db, &estimates).await.unwrap();
    assert!(outcome.failures.is_empty());
    outcome.rows
}

fn writer() -> CatalogWriter {
    CatalogWriter::new(
        WriterOptions::default(),
        Arc::new(MetricsRegistry::new()),
        AutoRefreshLedger::new(),
    )
}

// =============================================================================
// SLOT ALLOCATION
// =============================================================================

/// Test: at most five slots per column, each kind at most once, in
/// MCV → histogram → correlation order.
#[tokio::test]
async fn test_slots_bounded_and_unique() {
    let mut db = database();
    let rows = translated(&mut db).await;
    assert_eq!(rows.len(), 4);

    for row in &rows {
        assert!(row.slots().len() <= SLOT_COUNT);
        let mut kinds: Vec<i16> = row.slots().iter().map(|s| s.kind.code()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), row.slots().len(), "{}", row.label());
        for slot in row.slots() {
            if let Some(values) = &slot.values {
                assert!(!values.is_empty());
            }
        }
    }

    let amount = rows.iter().find(|r| r.column == "amount").unwrap();
    let kinds: Vec<StatsKind> = amount.slots().iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StatsKind::MostCommonValues,
            StatsKind::Histogram,
            StatsKind::Correlation
        ]
    );
}

/// Test: a type without ordering or equality operators only carries scalars.
#[tokio::test]
async fn test_unsortable_type_gets_scalars_only() {
    let mut db = database();
    let rows = translated(&mut db).await;
    let payload = rows.iter().find(|r| r.column == "payload").unwrap();
    assert!(payload.slots().is_empty());
    assert_eq!(payload.null_frac, 0.9);
}

// =============================================================================
// ROUND TRIP
// =============================================================================

/// Test: everything written reads back as verified.
#[tokio::test]
async fn test_round_trip_verifies() {
    let mut db = database();
    let rows = translated(&mut db).await;
    let mut w = writer();

    let report = w.apply(&mut db, &rows).await.unwrap();
    assert_eq!(report.applied(), rows.len());
    assert_eq!(report.failed, 0);
    assert!(report.field_failures.is_empty());

    for check in w.verify(&mut db, &rows).await.unwrap() {
        assert!(check.is_consistent(), "{:?}", check);
        assert!(check
            .fields
            .iter()
            .all(|f| f.status == FieldStatus::Verified));
    }
    assert!(db.auto_refresh_enabled("orders"));
    assert!(db.auto_refresh_enabled("customers"));
    assert!(!db.in_transaction());
}

/// Test: the encoding chain falls through rejected techniques and the result
/// still verifies.
#[tokio::test]
async fn test_round_trip_through_fallback_techniques() {
    let mut db = database();
    db.reject_technique(EncodingTechnique::ArrayIn);
    db.reject_technique(EncodingTechnique::TypedCast);
    let rows: Vec<CatalogSlotRow> = translated(&mut db)
        .await
        .into_iter()
        .filter(|r| r.column == "amount")
        .collect();

    let mut w = writer();
    let report = w.apply(&mut db, &rows).await.unwrap();
    assert!(report.field_failures.is_empty());
    assert_eq!(report.values_written, 2);
    assert!(w.verify(&mut db, &rows).await.unwrap()[0].is_consistent());
}

// =============================================================================
// IDEMPOTENCE
// =============================================================================

/// Test: applying the same rows twice leaves identical catalog content.
#[tokio::test]
async fn test_apply_twice_is_idempotent() {
    let mut db = database();
    let rows = translated(&mut db).await;
    let mut w = writer();

    w.apply(&mut db, &rows).await.unwrap();
    let first = db.snapshot().await.unwrap();

    let second_report = w.apply(&mut db, &rows).await.unwrap();
    assert_eq!(second_report.inserted, 0);
    assert_eq!(second_report.updated, rows.len());
    assert_eq!(db.snapshot().await.unwrap(), first);
}

// =============================================================================
// FAILURE ISOLATION
// =============================================================================

/// Scenario: an encoding failure on one column's histogram slot does not
/// block that column's scalars or any other column.
#[tokio::test]
async fn test_histogram_failure_is_isolated() {
    let mut db = database();
    let rows = translated(&mut db).await;
    let amount = rows.iter().find(|r| r.column == "amount").unwrap();
    let (hist_slot, _) = amount.slot(StatsKind::Histogram).unwrap();
    db.fail_values_writes("orders", "amount", hist_slot);

    let metrics = Arc::new(MetricsRegistry::new());
    let mut w = CatalogWriter::new(
        WriterOptions::default(),
        metrics.clone(),
        AutoRefreshLedger::new(),
    );
    let report = w.apply(&mut db, &rows).await.unwrap();

    assert_eq!(report.applied(), rows.len());
    assert_eq!(report.failed, 0);
    assert_eq!(report.field_failures.len(), 1);
    let failure = &report.field_failures[0];
    assert_eq!(failure.slot, hist_slot);
    assert_eq!(failure.kind, StatsKind::Histogram);
    assert_eq!(metrics.snapshot().values_failed, 1);

    let checks = w.verify(&mut db, &rows).await.unwrap();
    for check in &checks {
        assert!(check.is_consistent(), "{:?}", check);
    }
    let amount_check = checks.iter().find(|c| c.column == "orders.amount").unwrap();
    assert_eq!(amount_check.status_of("stanullfrac"), Some(&FieldStatus::Verified));
    assert_eq!(
        amount_check.status_of(&format!("stavalues{}", hist_slot)),
        Some(&FieldStatus::Null)
    );

    // The failed field is null, never half-written
    let stored = db.catalog_row("orders", "amount").unwrap();
    assert!(stored.slots[hist_slot - 1].values.is_none());
    assert!(stored.slot_of(StatsKind::MostCommonValues).unwrap().values.is_some());

    let note = checks.iter().find(|c| c.column == "orders.note").unwrap();
    assert!(note.fields.iter().all(|f| f.status == FieldStatus::Verified));
}
