//! # Catalog Row Translator
//!
//! Maps sanitized estimates onto the five-slot catalog layout. Slots are
//! allocated in fixed priority into the next free index:
//!
//! 1. MCV (values + frequencies), needs an `=` operator
//! 2. Histogram (bounds), needs an ordering operator
//! 3. Correlation (one number), needs an ordering operator
//!
//! Numbers arrays are always `float4`; values arrays take the column's
//! element type when the writer encodes them. A column with only scalar
//! statistics still gets a row, with every slot empty.

use super::errors::{CatalogError, CatalogResult};
use super::identity::IdentityResolver;
use super::kind::StatsKind;
use super::row::{CatalogSlot, CatalogSlotRow, ColumnIdentity, ColumnTypeInfo, TableRef};
use crate::estimate::ColumnEstimate;
use crate::observability::{log_event_with_fields, Event};
use crate::session::Session;

/// A column that could not be translated
#[derive(Debug, Clone)]
pub struct TranslationFailure {
    pub column: String,
    pub error: CatalogError,
}

/// Translated rows plus per-column failures
#[derive(Debug, Clone, Default)]
pub struct TranslationOutcome {
    pub rows: Vec<CatalogSlotRow>,
    pub failures: Vec<TranslationFailure>,
}

fn wants_values(estimate: &ColumnEstimate, type_info: &ColumnTypeInfo) -> bool {
    (estimate.has_mcv() && type_info.eq_operator != 0)
        || (estimate.has_histogram() && type_info.is_sortable())
}

/// Fill the slots of `row` from `estimate`
pub fn allocate_slots(row: &mut CatalogSlotRow, estimate: &ColumnEstimate) -> CatalogResult<()> {
    let type_info = row.type_info.clone();
    let collation = type_info.collation;
    let mut candidates = Vec::new();

    if estimate.has_mcv() && type_info.eq_operator != 0 {
        candidates.push(CatalogSlot {
            kind: StatsKind::MostCommonValues,
            operator: type_info.eq_operator,
            collation,
            numbers: Some(estimate.most_common_freqs.iter().map(|f| *f as f32).collect()),
            values: Some(estimate.most_common_vals.clone()),
        });
    }
    if estimate.has_histogram() && type_info.is_sortable() {
        candidates.push(CatalogSlot {
            kind: StatsKind::Histogram,
            operator: type_info.lt_operator,
            collation,
            numbers: None,
            values: Some(estimate.histogram_bounds.clone()),
        });
    }
    if let Some(correlation) = estimate.correlation {
        if type_info.is_sortable() {
            candidates.push(CatalogSlot {
                kind: StatsKind::Correlation,
                operator: type_info.lt_operator,
                collation,
                numbers: Some(vec![correlation as f32]),
                values: None,
            });
        }
    }

    for slot in candidates {
        match row.push_slot(slot) {
            Ok(_) => {}
            Err(CatalogError::SlotsExhausted(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Build the catalog row of one resolved column
pub fn build_row(
    estimate: &ColumnEstimate,
    identity: ColumnIdentity,
    type_info: ColumnTypeInfo,
) -> CatalogResult<CatalogSlotRow> {
    if wants_values(estimate, &type_info)
        && (type_info.type_oid == 0 || type_info.array_type_name.is_none())
    {
        return Err(CatalogError::MissingElementType(
            estimate.label(),
            type_info.type_name,
        ));
    }
    let mut row = CatalogSlotRow::new(
        TableRef::new(&estimate.schema, &estimate.table),
        &estimate.column,
        identity,
        type_info,
    );
    row.null_frac = estimate.null_frac as f32;
    row.avg_width = estimate.avg_width;
    row.n_distinct = estimate.n_distinct as f32;
    allocate_slots(&mut row, estimate)?;
    Ok(row)
}

/// Resolves identities and builds rows
#[derive(Debug, Default)]
pub struct Translator {
    resolver: IdentityResolver,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Translate every estimate. Column problems land in `failures`; only
    /// session errors fail the call.
    pub async fn translate(
        &mut self,
        session: &mut dyn Session,
        estimates: &[ColumnEstimate],
    ) -> CatalogResult<TranslationOutcome> {
        let mut outcome = TranslationOutcome::default();
        for estimate in estimates {
            let table = TableRef::new(&estimate.schema, &estimate.table);
            let label = estimate.label();
            let result = match self.resolver.resolve(session, &table, &estimate.column).await? {
                Some((identity, type_info)) => build_row(estimate, identity, type_info),
                None => Err(CatalogError::UnresolvedColumn(label.clone())),
            };
            match result {
                Ok(row) => {
                    let kinds: Vec<&str> = row.slots().iter().map(|s| s.kind.as_str()).collect();
                    log_event_with_fields(
                        Event::RowTranslated,
                        &[
                            ("column", &label),
                            ("identity", &row.identity.to_string()),
                            ("slots", &kinds.join(",")),
                        ],
                    );
                    outcome.rows.push(row);
                }
                Err(error) => {
                    log_event_with_fields(
                        Event::TranslationFailed,
                        &[
                            ("column", &label),
                            ("code", error.code()),
                            ("reason", &error.to_string()),
                        ],
                    );
                    outcome.failures.push(TranslationFailure {
                        column: label,
                        error,
                    });
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{builtin_type, MemoryDatabase};

    fn estimate() -> ColumnEstimate {
        let mut e = ColumnEstimate::new("public", "orders", "amount");
        e.null_frac = 0.1;
        e.avg_width = 4;
        e.n_distinct = -0.5;
        e.most_common_vals = vec!["10".into(), "20".into()];
        e.most_common_freqs = vec![0.3, 0.2];
        e.histogram_bounds = vec!["1".into(), "50".into(), "100".into()];
        e.correlation = Some(0.8);
        e
    }

    #[test]
    fn test_priority_order() {
        let row = build_row(&estimate(), ColumnIdentity::new(1, 1), builtin_type("integer")).unwrap();
        let kinds: Vec<StatsKind> = row.slots().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StatsKind::MostCommonValues,
                StatsKind::Histogram,
                StatsKind::Correlation
            ]
        );
        let (n, mcv) = row.slot(StatsKind::MostCommonValues).unwrap();
        assert_eq!(n, 1);
        assert_eq!(mcv.operator, 96);
        assert_eq!(mcv.numbers.as_deref(), Some(&[0.3f32, 0.2][..]));
        let (_, corr) = row.slot(StatsKind::Correlation).unwrap();
        assert_eq!(corr.numbers.as_deref(), Some(&[0.8f32][..]));
        assert!(corr.values.is_none());
    }

    #[test]
    fn test_unsortable_type_gets_no_order_slots() {
        let mut e = estimate();
        e.most_common_vals.clear();
        e.most_common_freqs.clear();
        let row = build_row(&e, ColumnIdentity::new(1, 1), builtin_type("json")).unwrap();
        assert!(row.slots().is_empty());
        assert_eq!(row.null_frac, 0.1);
    }

    #[test]
    fn test_scalar_only_row() {
        let e = ColumnEstimate::new("public", "orders", "id");
        let row = build_row(&e, ColumnIdentity::new(1, 1), builtin_type("integer")).unwrap();
        assert!(row.slots().is_empty());
        assert!(row.scalar_patch().headers.iter().all(|h| h.kind == 0));
    }

    #[test]
    fn test_missing_array_type_fails_only_with_values() {
        let mut info = builtin_type("integer");
        info.array_type_name = None;
        assert!(matches!(
            build_row(&estimate(), ColumnIdentity::new(1, 1), info.clone()),
            Err(CatalogError::MissingElementType(_, _))
        ));

        let mut e = ColumnEstimate::new("public", "orders", "amount");
        e.correlation = Some(0.5);
        assert!(build_row(&e, ColumnIdentity::new(1, 1), info).is_ok());
    }

    #[tokio::test]
    async fn test_translate_isolates_column_failures() {
        let mut db = MemoryDatabase::new().with_table("orders", 10, &[("amount", "integer")]);
        let mut ghost = estimate();
        ghost.column = "ghost".into();
        let mut translator = Translator::new();
        let outcome = translator
            .translate(&mut db, &[estimate(), ghost])
            .await
            .unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(
            outcome.failures[0].error.code(),
            "STATBENCH_CATALOG_UNRESOLVED_COLUMN"
        );
    }
}
