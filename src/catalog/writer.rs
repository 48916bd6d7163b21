//! # Catalog Writer
//!
//! The only component that mutates `pg_statistic`.
//!
//! ## Apply protocol
//!
//! 1. Suppress automatic statistics refresh on every touched table
//! 2. BEGIN
//! 3. Per column, sequentially:
//!    - ensure a baseline row exists (the `anyarray` columns need a
//!      concrete row to update against)
//!    - write scalars, slot headers and numbers in one statement
//!    - write each values array through the encoding chain, every attempt
//!      inside its own savepoint
//! 4. COMMIT; any session error rolls the whole batch back
//! 5. Restore automatic refresh, whatever happened above
//!
//! A values field that no technique can encode is cleared (its slot reset
//! to unused) and reported. It never fails the column or the batch.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::encoding::{chain_preferring, normalize_elements, EncodingTechnique};
use super::errors::{CatalogError, CatalogResult, EncodingError};
use super::kind::{StatsKind, SLOT_COUNT};
use super::row::{CatalogSlotRow, ColumnIdentity, TableRef};
use super::snapshot::RawCatalogRow;
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry, ObservationScope};
use crate::session::{Session, SessionError, SessionResult, TxControl};

/// Writer behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Insert an empty baseline row for columns that have none
    pub create_missing_baseline: bool,
    /// Try the technique that last succeeded for a field first
    pub encoding_cache: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            create_missing_baseline: true,
            encoding_cache: false,
        }
    }
}

/// Tables whose automatic refresh is currently suppressed. Shared with the
/// orchestrator so teardown can restore anything an interrupted apply left.
#[derive(Debug, Clone, Default)]
pub struct AutoRefreshLedger {
    disabled: Arc<Mutex<BTreeSet<TableRef>>>,
}

impl AutoRefreshLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<TableRef>> {
        self.disabled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_disabled(&self, table: &TableRef) {
        self.lock().insert(table.clone());
    }

    pub fn mark_restored(&self, table: &TableRef) {
        self.lock().remove(table);
    }

    pub fn disabled(&self) -> Vec<TableRef> {
        self.lock().iter().cloned().collect()
    }

    /// Re-enable refresh on every suppressed table. Tries them all and
    /// returns the first error.
    pub async fn restore_all(&self, session: &mut dyn Session) -> SessionResult<usize> {
        let mut restored = 0;
        let mut first_error = None;
        for table in self.disabled() {
            match session.set_auto_refresh(&table, true).await {
                Ok(()) => {
                    self.mark_restored(&table);
                    log_event_with_fields(Event::AutoRefreshRestored, &[("table", &table.to_string())]);
                    restored += 1;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(restored),
        }
    }
}

/// A values field left null
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFailure {
    pub column: String,
    pub identity: ColumnIdentity,
    /// 1-based slot number
    pub slot: usize,
    pub kind: StatsKind,
    pub error: String,
}

/// Outcome of one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    /// Columns whose existing catalog row was updated
    pub updated: usize,
    /// Columns that needed a baseline row first
    pub inserted: usize,
    /// Columns that could not be written at all
    pub failed: usize,
    /// Values arrays written
    pub values_written: usize,
    pub field_failures: Vec<FieldFailure>,
}

impl ApplyReport {
    /// Columns that received statistics
    pub fn applied(&self) -> usize {
        self.updated + self.inserted
    }
}

/// Verification result of one field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldStatus {
    Verified,
    /// Left null after an encoding failure
    Null,
    Mismatch { expected: String, actual: String },
    /// No catalog row
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCheck {
    /// Catalog column name, e.g. `stavalues2`
    pub field: String,
    pub status: FieldStatus,
}

/// Verification of one column's catalog row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowVerification {
    pub column: String,
    pub identity: ColumnIdentity,
    pub fields: Vec<FieldCheck>,
}

impl RowVerification {
    /// No mismatches and a row present. Null fields are acceptable.
    pub fn is_consistent(&self) -> bool {
        self.fields
            .iter()
            .all(|f| matches!(f.status, FieldStatus::Verified | FieldStatus::Null))
    }

    pub fn status_of(&self, field: &str) -> Option<&FieldStatus> {
        self.fields.iter().find(|f| f.field == field).map(|f| &f.status)
    }
}

/// Applies translated rows to the catalog
#[derive(Debug)]
pub struct CatalogWriter {
    options: WriterOptions,
    metrics: Arc<MetricsRegistry>,
    auto_refresh: AutoRefreshLedger,
    techniques: HashMap<(ColumnIdentity, usize), EncodingTechnique>,
}

impl CatalogWriter {
    pub fn new(options: WriterOptions, metrics: Arc<MetricsRegistry>, auto_refresh: AutoRefreshLedger) -> Self {
        Self {
            options,
            metrics,
            auto_refresh,
            techniques: HashMap::new(),
        }
    }

    pub fn options(&self) -> WriterOptions {
        self.options
    }

    /// Technique remembered for a field, if caching is on
    pub fn cached_technique(&self, identity: ColumnIdentity, slot: usize) -> Option<EncodingTechnique> {
        self.techniques.get(&(identity, slot)).copied()
    }

    /// Apply a batch. See the module docs for the protocol.
    pub async fn apply(
        &mut self,
        session: &mut dyn Session,
        rows: &[CatalogSlotRow],
    ) -> CatalogResult<ApplyReport> {
        if rows.is_empty() {
            return Ok(ApplyReport::default());
        }
        let count = rows.len().to_string();
        let scope = ObservationScope::with_fields("CATALOG_APPLY", &[("columns", &count)]);

        let tables: BTreeSet<TableRef> = rows.iter().map(|r| r.table.clone()).collect();
        let mut suppressed = Vec::new();
        let mut outcome = Ok(());
        for table in &tables {
            match session.set_auto_refresh(table, false).await {
                Ok(()) => {
                    self.auto_refresh.mark_disabled(table);
                    log_event_with_fields(Event::AutoRefreshDisabled, &[("table", &table.to_string())]);
                    suppressed.push(table.clone());
                }
                Err(e) => {
                    outcome = Err(CatalogError::Session(e));
                    break;
                }
            }
        }

        let result = match outcome {
            Ok(()) => self.apply_batch(session, rows).await,
            Err(e) => Err(e),
        };

        for table in &suppressed {
            match session.set_auto_refresh(table, true).await {
                Ok(()) => {
                    self.auto_refresh.mark_restored(table);
                    log_event_with_fields(Event::AutoRefreshRestored, &[("table", &table.to_string())]);
                }
                Err(e) => Logger::warn(
                    "AUTO_REFRESH_RESTORE_FAILED",
                    &[("table", &table.to_string()), ("error", &e.to_string())],
                ),
            }
        }

        match &result {
            Ok(report) => scope.complete_with_fields(&[
                ("updated", &report.updated.to_string()),
                ("inserted", &report.inserted.to_string()),
                ("failed", &report.failed.to_string()),
                ("field_failures", &report.field_failures.len().to_string()),
            ]),
            Err(e) => scope.fail(&e.to_string()),
        }
        result
    }

    async fn apply_batch(
        &mut self,
        session: &mut dyn Session,
        rows: &[CatalogSlotRow],
    ) -> CatalogResult<ApplyReport> {
        session
            .transaction(TxControl::Begin)
            .await
            .map_err(|source| CatalogError::BatchFailed {
                column: "BEGIN".to_string(),
                source,
            })?;

        let mut report = ApplyReport::default();
        for row in rows {
            if let Err(source) = self.apply_row(session, row, &mut report).await {
                if let Err(e) = session.transaction(TxControl::Rollback).await {
                    Logger::warn("ROLLBACK_FAILED", &[("error", &e.to_string())]);
                }
                log_event_with_fields(
                    Event::CatalogRolledBack,
                    &[("column", &row.label()), ("error", &source.to_string())],
                );
                self.metrics.add_columns_failed(rows.len() as u64);
                return Err(CatalogError::BatchFailed {
                    column: row.label(),
                    source,
                });
            }
        }

        session
            .transaction(TxControl::Commit)
            .await
            .map_err(|source| CatalogError::BatchFailed {
                column: "COMMIT".to_string(),
                source,
            })?;
        log_event_with_fields(
            Event::CatalogCommitted,
            &[
                ("updated", &report.updated.to_string()),
                ("inserted", &report.inserted.to_string()),
            ],
        );
        self.metrics.add_columns_updated(report.updated as u64);
        self.metrics.add_columns_inserted(report.inserted as u64);
        self.metrics.add_columns_failed(report.failed as u64);
        Ok(report)
    }

    async fn apply_row(
        &mut self,
        session: &mut dyn Session,
        row: &CatalogSlotRow,
        report: &mut ApplyReport,
    ) -> SessionResult<()> {
        let label = row.label();
        let inserted = if session.baseline_exists(row.identity).await? {
            false
        } else if self.options.create_missing_baseline {
            session.insert_empty_baseline(row.identity).await?;
            true
        } else {
            let error = CatalogError::MissingBaseline(label.clone());
            Logger::warn("COLUMN_SKIPPED", &[("column", &label), ("code", error.code())]);
            report.failed += 1;
            return Ok(());
        };

        if session.write_scalars(&row.scalar_patch()).await? == 0 {
            Logger::warn("COLUMN_SKIPPED", &[("column", &label), ("reason", "no row updated")]);
            report.failed += 1;
            return Ok(());
        }

        for (index, slot) in row.slots().iter().enumerate() {
            let number = index + 1;
            let Some(values) = &slot.values else {
                continue;
            };
            match self.write_field(session, row, number, values).await? {
                Ok(_) => report.values_written += 1,
                Err(error) => {
                    session.clear_slot(row.identity, number).await?;
                    report.field_failures.push(FieldFailure {
                        column: label.clone(),
                        identity: row.identity,
                        slot: number,
                        kind: slot.kind,
                        error: error.to_string(),
                    });
                }
            }
        }

        if inserted {
            report.inserted += 1;
        } else {
            report.updated += 1;
        }
        Ok(())
    }

    /// Run the encoding chain for one values field. The outer error is a
    /// lost session; the inner one is this field's failure.
    async fn write_field(
        &mut self,
        session: &mut dyn Session,
        row: &CatalogSlotRow,
        slot: usize,
        values: &[String],
    ) -> SessionResult<Result<EncodingTechnique, EncodingError>> {
        let label = row.label();
        let slot_text = slot.to_string();
        let preferred = if self.options.encoding_cache {
            self.cached_technique(row.identity, slot)
        } else {
            None
        };
        let savepoint = format!("statbench_values_{}", slot);
        let mut attempts = 0;

        for technique in chain_preferring(preferred) {
            let encoded = match technique.encode(values, &row.type_info) {
                Ok(encoded) => encoded,
                Err(e) => {
                    Logger::trace(
                        Event::EncodingAttempt.as_str(),
                        &[
                            ("column", &label),
                            ("slot", &slot_text),
                            ("technique", technique.as_str()),
                            ("outcome", "not_applicable"),
                            ("reason", &e.to_string()),
                        ],
                    );
                    continue;
                }
            };

            attempts += 1;
            self.metrics.increment_fallback_attempts();
            session
                .transaction(TxControl::Savepoint(savepoint.clone()))
                .await?;
            match session.write_values(row.identity, slot, &encoded).await {
                Ok(_) => {
                    session
                        .transaction(TxControl::Release(savepoint.clone()))
                        .await?;
                    log_event_with_fields(
                        Event::EncodingAttempt,
                        &[
                            ("column", &label),
                            ("slot", &slot_text),
                            ("technique", technique.as_str()),
                            ("outcome", "accepted"),
                        ],
                    );
                    self.metrics.increment_values_encoded();
                    if self.options.encoding_cache {
                        self.techniques.insert((row.identity, slot), technique);
                    }
                    return Ok(Ok(technique));
                }
                Err(e) if e.is_connection_loss() => return Err(e),
                Err(e) => {
                    let rejected = EncodingError::Rejected {
                        technique,
                        message: e.to_string(),
                    };
                    log_event_with_fields(
                        Event::EncodingAttempt,
                        &[
                            ("column", &label),
                            ("slot", &slot_text),
                            ("technique", technique.as_str()),
                            ("outcome", "rejected"),
                            ("code", rejected.code()),
                            ("reason", &rejected.to_string()),
                        ],
                    );
                    session
                        .transaction(TxControl::RollbackTo(savepoint.clone()))
                        .await?;
                    session
                        .transaction(TxControl::Release(savepoint.clone()))
                        .await?;
                }
            }
        }

        self.techniques.remove(&(row.identity, slot));
        self.metrics.increment_values_failed();
        let error = EncodingError::Exhausted {
            column: label.clone(),
            slot,
            attempts,
        };
        log_event_with_fields(
            Event::EncodingFailed,
            &[
                ("column", &label),
                ("slot", &slot_text),
                ("code", error.code()),
                ("attempts", &attempts.to_string()),
            ],
        );
        Ok(Err(error))
    }

    /// Read rows back and compare every field with what was meant to be
    /// written
    pub async fn verify(
        &self,
        session: &mut dyn Session,
        rows: &[CatalogSlotRow],
    ) -> CatalogResult<Vec<RowVerification>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = session.read_catalog(row.identity).await?;
            let fields = match stored {
                Some(stored) => compare_row(row, &stored),
                None => vec![FieldCheck {
                    field: "row".to_string(),
                    status: FieldStatus::Missing,
                }],
            };
            out.push(RowVerification {
                column: row.label(),
                identity: row.identity,
                fields,
            });
        }
        Ok(out)
    }

    /// Insert empty baseline rows for the columns of `table` that lack one.
    /// Returns the number inserted.
    pub async fn create_empty_baseline(
        &self,
        session: &mut dyn Session,
        table: &TableRef,
    ) -> CatalogResult<usize> {
        let schema = session.describe_schema().await?;
        let Some(info) = schema.table(Some(&table.schema), &table.table) else {
            return Err(CatalogError::UnresolvedColumn(format!("{}.*", table)));
        };
        let columns: Vec<String> = info.columns.iter().map(|c| c.name.clone()).collect();

        session.transaction(TxControl::Begin).await?;
        match insert_baselines(session, table, &columns).await {
            Ok(inserted) => {
                session.transaction(TxControl::Commit).await?;
                log_event_with_fields(
                    Event::BaselineCreated,
                    &[("table", &table.to_string()), ("rows", &inserted.to_string())],
                );
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rollback) = session.transaction(TxControl::Rollback).await {
                    Logger::warn("ROLLBACK_FAILED", &[("error", &rollback.to_string())]);
                }
                Err(e.into())
            }
        }
    }

    /// Delete every catalog row of the given tables
    pub async fn clear_table_statistics(
        &self,
        session: &mut dyn Session,
        tables: &[TableRef],
    ) -> CatalogResult<u64> {
        let mut removed = 0;
        for table in tables {
            removed += session.delete_table_statistics(table).await?;
        }
        Logger::info("TABLE_STATISTICS_CLEARED", &[("rows", &removed.to_string())]);
        Ok(removed)
    }
}

async fn insert_baselines(
    session: &mut dyn Session,
    table: &TableRef,
    columns: &[String],
) -> Result<usize, SessionError> {
    let mut inserted = 0;
    for column in columns {
        let Some((identity, _)) = session.resolve_column(table, column).await? else {
            continue;
        };
        if !session.baseline_exists(identity).await? {
            session.insert_empty_baseline(identity).await?;
            inserted += 1;
        }
    }
    Ok(inserted)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
}

fn check(field: String, ok: bool, expected: String, actual: String) -> FieldCheck {
    let status = if ok {
        FieldStatus::Verified
    } else {
        FieldStatus::Mismatch { expected, actual }
    };
    FieldCheck { field, status }
}

fn same_element(expected: &str, actual: Option<&str>) -> bool {
    match actual {
        Some(actual) if actual == expected => true,
        Some(actual) => match (expected.parse::<f64>(), actual.parse::<f64>()) {
            (Ok(a), Ok(b)) => close(a, b),
            _ => false,
        },
        None => false,
    }
}

fn compare_row(row: &CatalogSlotRow, stored: &RawCatalogRow) -> Vec<FieldCheck> {
    let mut fields = vec![
        check(
            "stanullfrac".into(),
            close(row.null_frac as f64, stored.null_frac as f64),
            row.null_frac.to_string(),
            stored.null_frac.to_string(),
        ),
        check(
            "stawidth".into(),
            row.avg_width == stored.avg_width,
            row.avg_width.to_string(),
            stored.avg_width.to_string(),
        ),
        check(
            "stadistinct".into(),
            close(row.n_distinct as f64, stored.n_distinct as f64),
            row.n_distinct.to_string(),
            stored.n_distinct.to_string(),
        ),
    ];

    for n in 1..=SLOT_COUNT {
        let actual = stored.slots.get(n - 1).cloned().unwrap_or_default();
        let Some(expected) = row.slots().get(n - 1) else {
            fields.push(check(
                format!("stakind{}", n),
                actual.kind == 0,
                "0".into(),
                actual.kind.to_string(),
            ));
            continue;
        };

        // A slot cleared after an encoding failure
        if expected.values.is_some() && actual.is_empty() {
            fields.push(FieldCheck {
                field: format!("stavalues{}", n),
                status: FieldStatus::Null,
            });
            continue;
        }

        fields.push(check(
            format!("stakind{}", n),
            actual.kind == expected.kind.code(),
            expected.kind.code().to_string(),
            actual.kind.to_string(),
        ));
        fields.push(check(
            format!("staop{}", n),
            actual.operator == expected.operator,
            expected.operator.to_string(),
            actual.operator.to_string(),
        ));
        fields.push(check(
            format!("stacoll{}", n),
            actual.collation == expected.collation,
            expected.collation.to_string(),
            actual.collation.to_string(),
        ));

        let numbers_ok = match (&expected.numbers, &actual.numbers) {
            (None, None) => true,
            (Some(e), Some(a)) => {
                e.len() == a.len() && e.iter().zip(a).all(|(x, y)| close(*x as f64, *y as f64))
            }
            _ => false,
        };
        fields.push(check(
            format!("stanumbers{}", n),
            numbers_ok,
            format!("{:?}", expected.numbers),
            format!("{:?}", actual.numbers),
        ));

        if let Some(values) = &expected.values {
            let expected_elements = normalize_elements(values, &row.type_info);
            let field = format!("stavalues{}", n);
            match &actual.values {
                None => fields.push(FieldCheck {
                    field,
                    status: FieldStatus::Null,
                }),
                Some(stored_values) => {
                    let ok = expected_elements.len() == stored_values.len()
                        && expected_elements
                            .iter()
                            .zip(stored_values)
                            .all(|(e, a)| same_element(e, a.as_deref()));
                    fields.push(check(
                        field,
                        ok,
                        format!("{:?}", expected_elements),
                        format!("{:?}", stored_values),
                    ));
                }
            }
        }
    }
    fields
}
