//! # In-Memory Database
//!
//! A `Session` backed by a simulated catalog. It models what the writer and
//! orchestrator depend on:
//!
//! - a `pg_statistic` map keyed by (relid, attnum) with five raw slots
//! - transactions and savepoints, including the aborted-transaction state
//!   after a failed statement
//! - scripted workload statements (select, insert, failure, timeout)
//! - server-side rejection of chosen encoding techniques or fields
//!
//! Handles are cheap clones of one shared database; [`MemoryDatabase::fork`]
//! makes an independent copy.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use serde_json::json;

use super::backend::{check_slot, Session, TxControl};
use super::errors::{SessionError, SessionResult};
use super::provisioner::{Connector, Provisioner};
use crate::catalog::{
    CatalogSnapshot, ColumnIdentity, ColumnTypeInfo, EncodedArray, EncodingTechnique,
    PlannerStatsRow, RawCatalogRow, RawSlot, ScalarPatch, StatsKind, TableRef, TypeCategory,
};
use crate::estimate::{ColumnInfo, SchemaInfo, TableInfo};
use crate::pgtext::is_plain_identifier;

const FIRST_RELID: u32 = 16384;
const CUSTOM_TYPE_OID: u32 = 90000;
const DEFAULT_COLLATION: u32 = 100;

/// What a scripted workload statement does
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Returns the table's current row count
    Select { table: String },
    /// Adds `rows` rows to the table
    Insert { table: String, rows: u64 },
    /// Fails with a syntax error carrying the message
    Fail(String),
    /// Cancelled by the statement timeout
    Timeout,
}

/// Type metadata for the builtin type names the simulation understands.
/// Unknown names become a custom type with no array type and no operators.
pub fn builtin_type(name: &str) -> ColumnTypeInfo {
    let make = |oid: u32, type_name: &str, category, lt, eq, collation| ColumnTypeInfo {
        type_oid: oid,
        type_name: type_name.to_string(),
        category,
        array_type_name: Some(format!("{}[]", type_name)),
        lt_operator: lt,
        eq_operator: eq,
        collation,
    };
    match name.trim().to_ascii_lowercase().as_str() {
        "integer" | "int" | "int4" => make(23, "integer", TypeCategory::Numeric, 97, 96, 0),
        "bigint" | "int8" => make(20, "bigint", TypeCategory::Numeric, 412, 410, 0),
        "numeric" => make(1700, "numeric", TypeCategory::Numeric, 1754, 1752, 0),
        "double precision" | "float8" => {
            make(701, "double precision", TypeCategory::Numeric, 672, 670, 0)
        }
        "text" => make(25, "text", TypeCategory::String, 664, 98, DEFAULT_COLLATION),
        "boolean" | "bool" => make(16, "boolean", TypeCategory::Boolean, 58, 91, 0),
        "date" => make(1082, "date", TypeCategory::DateTime, 1095, 1093, 0),
        "json" => make(114, "json", TypeCategory::Other, 0, 0, 0),
        other => ColumnTypeInfo {
            type_oid: CUSTOM_TYPE_OID,
            type_name: other.to_string(),
            category: TypeCategory::Other,
            array_type_name: None,
            lt_operator: 0,
            eq_operator: 0,
            collation: 0,
        },
    }
}

fn width_of(info: &ColumnTypeInfo) -> i32 {
    match info.type_oid {
        16 => 1,
        23 | 1082 => 4,
        20 | 701 => 8,
        _ => 32,
    }
}

#[derive(Debug, Clone)]
struct MemColumn {
    name: String,
    attnum: i16,
    type_info: ColumnTypeInfo,
    stats_target: i32,
}

#[derive(Debug, Clone)]
struct MemTable {
    relid: u32,
    name: String,
    columns: Vec<MemColumn>,
}

/// Transactional part of the database
#[derive(Debug, Clone, Default)]
struct State {
    catalog: BTreeMap<ColumnIdentity, RawCatalogRow>,
    row_counts: BTreeMap<String, u64>,
    auto_refresh: BTreeMap<String, bool>,
}

#[derive(Debug, Clone)]
struct Frame {
    savepoint: Option<String>,
    saved: State,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    tables: Vec<MemTable>,
    state: State,
    frames: Vec<Frame>,
    aborted: bool,
    parameters: BTreeMap<String, String>,
    scripts: BTreeMap<String, Effect>,
    rejected_techniques: HashSet<EncodingTechnique>,
    failing_values: HashSet<(String, String, usize)>,
    statement_stats: bool,
    journal: Vec<String>,
    analyze_runs: usize,
    counter_resets: usize,
}

impl Inner {
    fn in_transaction(&self) -> bool {
        !self.frames.is_empty()
    }

    fn table(&self, name: &str) -> Option<&MemTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn table_ref(&self, table: &TableRef) -> SessionResult<&MemTable> {
        if table.schema != "public" {
            return Err(SessionError::sql(
                "42P01",
                format!("relation \"{}\" does not exist", table),
            ));
        }
        self.table(&table.table).ok_or_else(|| {
            SessionError::sql("42P01", format!("relation \"{}\" does not exist", table))
        })
    }

    fn column_of(&self, identity: ColumnIdentity) -> Option<(&MemTable, &MemColumn)> {
        let table = self.tables.iter().find(|t| t.relid == identity.relid)?;
        let column = table.columns.iter().find(|c| c.attnum == identity.attnum)?;
        Some((table, column))
    }

    fn rows(&self, table: &str) -> u64 {
        self.state.row_counts.get(table).copied().unwrap_or(0)
    }

    fn has_stats(&self, relid: u32) -> bool {
        self.state.catalog.keys().any(|k| k.relid == relid)
    }

    fn builtin_row(&self, table: &MemTable, column: &MemColumn) -> RawCatalogRow {
        let identity = ColumnIdentity::new(table.relid, column.attnum);
        let mut row = RawCatalogRow::empty(identity);
        row.avg_width = width_of(&column.type_info);
        row.n_distinct = -1.0;
        if column.type_info.is_sortable() {
            row.slots[0] = RawSlot {
                kind: StatsKind::Correlation.code(),
                operator: column.type_info.lt_operator,
                collation: column.type_info.collation,
                numbers: Some(vec![1.0]),
                values: None,
            };
        }
        row
    }
}

/// In-memory database handle
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builder form of [`add_table`](Self::add_table)
    pub fn with_table(self, name: &str, rows: u64, columns: &[(&str, &str)]) -> Self {
        self.add_table(name, rows, columns);
        self
    }

    /// Add a `public` table with `rows` rows; columns are (name, type name)
    pub fn add_table(&self, name: &str, rows: u64, columns: &[(&str, &str)]) {
        let mut inner = self.lock();
        let relid = FIRST_RELID + inner.tables.len() as u32;
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, (col, ty))| MemColumn {
                name: col.to_string(),
                attnum: (i + 1) as i16,
                type_info: builtin_type(ty),
                stats_target: -1,
            })
            .collect();
        inner.tables.push(MemTable {
            relid,
            name: name.to_string(),
            columns,
        });
        inner.state.row_counts.insert(name.to_string(), rows);
    }

    /// Register a workload statement
    pub fn script(&self, query: &str, effect: Effect) {
        self.lock().scripts.insert(query.trim().to_string(), effect);
    }

    /// Make the server reject every values write using `technique`
    pub fn reject_technique(&self, technique: EncodingTechnique) {
        self.lock().rejected_techniques.insert(technique);
    }

    /// Make every values write to one field fail, whatever the technique
    pub fn fail_values_writes(&self, table: &str, column: &str, slot: usize) {
        self.lock()
            .failing_values
            .insert((table.to_string(), column.to_string(), slot));
    }

    /// Pretend the statement statistics extension is installed
    pub fn enable_statement_stats(&self) {
        self.lock().statement_stats = true;
    }

    /// Independent deep copy
    pub fn fork(&self) -> Self {
        let copy = self.lock().clone();
        Self {
            inner: Arc::new(Mutex::new(copy)),
        }
    }

    /// Every statement run so far, in order
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn analyze_runs(&self) -> usize {
        self.lock().analyze_runs
    }

    pub fn counter_resets(&self) -> usize {
        self.lock().counter_resets
    }

    pub fn row_count(&self, table: &str) -> u64 {
        self.lock().rows(table)
    }

    pub fn parameter(&self, name: &str) -> Option<String> {
        self.lock().parameters.get(name).cloned()
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction()
    }

    pub fn auto_refresh_enabled(&self, table: &str) -> bool {
        self.lock()
            .state
            .auto_refresh
            .get(table)
            .copied()
            .unwrap_or(true)
    }

    pub fn statistics_target(&self, table: &str, column: &str) -> Option<i32> {
        let inner = self.lock();
        let table = inner.table(table)?;
        table
            .columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.stats_target)
    }

    pub fn identity(&self, table: &str, column: &str) -> Option<ColumnIdentity> {
        let inner = self.lock();
        let table = inner.table(table)?;
        let column = table.columns.iter().find(|c| c.name == column)?;
        Some(ColumnIdentity::new(table.relid, column.attnum))
    }

    pub fn catalog_row(&self, table: &str, column: &str) -> Option<RawCatalogRow> {
        let identity = self.identity(table, column)?;
        self.lock().state.catalog.get(&identity).cloned()
    }

    /// Run a non-control statement: refuse in an aborted transaction, journal
    /// it, and abort the transaction if it fails
    fn statement<T>(
        &self,
        label: impl Into<String>,
        f: impl FnOnce(&mut Inner) -> SessionResult<T>,
    ) -> SessionResult<T> {
        let mut inner = self.lock();
        if inner.aborted {
            return Err(SessionError::sql(
                "25P02",
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }
        inner.journal.push(label.into());
        let result = f(&mut *inner);
        if result.is_err() && inner.in_transaction() {
            inner.aborted = true;
        }
        result
    }

    fn control(&self, control: &TxControl) -> SessionResult<()> {
        let sql = control.sql()?;
        let mut inner = self.lock();
        inner.journal.push(sql);

        let not_in_tx = || {
            SessionError::sql(
                "25P01",
                "savepoints can only be used in transaction blocks",
            )
        };
        let no_savepoint =
            |name: &str| SessionError::sql("3B001", format!("savepoint \"{}\" does not exist", name));
        let find = |inner: &Inner, name: &str| {
            inner
                .frames
                .iter()
                .rposition(|f| f.savepoint.as_deref() == Some(name))
        };

        match control {
            TxControl::Begin => {
                if !inner.in_transaction() {
                    let saved = inner.state.clone();
                    inner.frames.push(Frame {
                        savepoint: None,
                        saved,
                    });
                }
                Ok(())
            }
            TxControl::Commit => {
                // COMMIT of an aborted transaction rolls it back
                if inner.aborted {
                    if let Some(saved) = inner.frames.first().map(|f| f.saved.clone()) {
                        inner.state = saved;
                    }
                }
                inner.frames.clear();
                inner.aborted = false;
                Ok(())
            }
            TxControl::Rollback => {
                if let Some(saved) = inner.frames.first().map(|f| f.saved.clone()) {
                    inner.state = saved;
                }
                inner.frames.clear();
                inner.aborted = false;
                Ok(())
            }
            TxControl::Savepoint(name) => {
                if !inner.in_transaction() {
                    return Err(not_in_tx());
                }
                if inner.aborted {
                    return Err(SessionError::sql("25P02", "current transaction is aborted"));
                }
                let saved = inner.state.clone();
                inner.frames.push(Frame {
                    savepoint: Some(name.clone()),
                    saved,
                });
                Ok(())
            }
            TxControl::RollbackTo(name) => {
                if !inner.in_transaction() {
                    return Err(not_in_tx());
                }
                let Some(pos) = find(&*inner, name) else {
                    inner.aborted = true;
                    return Err(no_savepoint(name));
                };
                let saved = inner.frames[pos].saved.clone();
                inner.state = saved;
                inner.frames.truncate(pos + 1);
                inner.aborted = false;
                Ok(())
            }
            TxControl::Release(name) => {
                if !inner.in_transaction() {
                    return Err(not_in_tx());
                }
                if inner.aborted {
                    return Err(SessionError::sql("25P02", "current transaction is aborted"));
                }
                let Some(pos) = find(&*inner, name) else {
                    inner.aborted = true;
                    return Err(no_savepoint(name));
                };
                inner.frames.truncate(pos);
                Ok(())
            }
        }
    }

    fn plan_for(inner: &Inner, query: &str) -> SessionResult<serde_json::Value> {
        let effect = inner
            .scripts
            .get(query.trim())
            .ok_or_else(|| SessionError::sql("42601", format!("syntax error in: {}", query)))?;
        let plan = match effect {
            Effect::Select { table } => {
                let relid = inner.table(table).map(|t| t.relid).unwrap_or(0);
                // Without statistics the planner falls back to a default guess
                // and a full scan
                let (node, rows) = if inner.has_stats(relid) {
                    ("Index Scan", inner.rows(table))
                } else {
                    ("Seq Scan", 1000)
                };
                json!({
                    "Node Type": node,
                    "Relation Name": table,
                    "Total Cost": 1.0 + rows as f64 * 0.01,
                    "Plan Rows": rows,
                })
            }
            Effect::Insert { table, rows } => json!({
                "Node Type": "ModifyTable",
                "Operation": "Insert",
                "Relation Name": table,
                "Total Cost": *rows as f64 * 0.01,
                "Plan Rows": 0,
            }),
            Effect::Timeout => json!({
                "Node Type": "Result",
                "Total Cost": 0.01,
                "Plan Rows": 1,
            }),
            Effect::Fail(message) => return Err(SessionError::sql("42601", message.clone())),
        };
        Ok(json!([{ "Plan": plan }]))
    }
}

impl Session for MemoryDatabase {
    fn transaction(&mut self, control: TxControl) -> BoxFuture<'_, SessionResult<()>> {
        let result = self.control(&control);
        Box::pin(std::future::ready(result))
    }

    fn set_parameter<'a>(
        &'a mut self,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, SessionResult<()>> {
        let result = self.statement(format!("SET {} = '{}'", name, value), |inner| {
            if !is_plain_identifier(name) {
                return Err(SessionError::InvalidIdentifier(name.to_string()));
            }
            inner.parameters.insert(name.to_string(), value.to_string());
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }

    fn discard_all(&mut self) -> BoxFuture<'_, SessionResult<()>> {
        let result = self.statement("DISCARD ALL", |inner| {
            if inner.in_transaction() {
                return Err(SessionError::sql(
                    "25001",
                    "DISCARD ALL cannot run inside a transaction block",
                ));
            }
            inner.parameters.clear();
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }

    fn reset_counters(&mut self) -> BoxFuture<'_, SessionResult<()>> {
        let result = self.statement("SELECT pg_stat_reset()", |inner| {
            inner.counter_resets += 1;
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }

    fn reset_statement_stats(&mut self) -> BoxFuture<'_, SessionResult<bool>> {
        let result = self.statement("SELECT pg_stat_statements_reset()", |inner| {
            Ok(inner.statement_stats)
        });
        Box::pin(std::future::ready(result))
    }

    fn analyze(&mut self, verbose: bool) -> BoxFuture<'_, SessionResult<()>> {
        let label = if verbose { "ANALYZE VERBOSE" } else { "ANALYZE" };
        let result = self.statement(label, |inner| {
            let mut rows = Vec::new();
            for table in &inner.tables {
                for column in &table.columns {
                    if column.stats_target != 0 {
                        rows.push(inner.builtin_row(table, column));
                    }
                }
            }
            for row in rows {
                inner.state.catalog.insert(row.identity(), row);
            }
            inner.analyze_runs += 1;
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }

    fn set_statistics_target<'a>(
        &'a mut self,
        table: &'a TableRef,
        column: &'a str,
        target: i32,
    ) -> BoxFuture<'a, SessionResult<()>> {
        let label = format!(
            "ALTER TABLE {} ALTER COLUMN {} SET STATISTICS {}",
            table, column, target
        );
        let result = self.statement(label, |inner| {
            if !(-1..=10000).contains(&target) {
                return Err(SessionError::sql(
                    "22023",
                    format!("statistics target {} is out of range", target),
                ));
            }
            let name = inner.table_ref(table)?.name.clone();
            let mem = inner
                .tables
                .iter_mut()
                .find(|t| t.name == name)
                .and_then(|t| t.columns.iter_mut().find(|c| c.name == column))
                .ok_or_else(|| {
                    SessionError::sql("42703", format!("column \"{}\" does not exist", column))
                })?;
            mem.stats_target = target;
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }

    fn explain<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, SessionResult<serde_json::Value>> {
        let result = self.statement(format!("EXPLAIN (FORMAT JSON) {}", query), |inner| {
            Self::plan_for(inner, query)
        });
        Box::pin(std::future::ready(result))
    }

    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, SessionResult<u64>> {
        let result = self.statement(query.trim(), |inner| {
            let effect = inner.scripts.get(query.trim()).cloned().ok_or_else(|| {
                SessionError::sql("42601", format!("syntax error in: {}", query))
            })?;
            match effect {
                Effect::Select { table } => Ok(inner.rows(&table)),
                Effect::Insert { table, rows } => {
                    *inner.state.row_counts.entry(table).or_insert(0) += rows;
                    Ok(rows)
                }
                Effect::Fail(message) => Err(SessionError::sql("42601", message)),
                Effect::Timeout => Err(SessionError::Timeout(
                    "canceling statement due to statement timeout".to_string(),
                )),
            }
        });
        Box::pin(std::future::ready(result))
    }

    fn describe_schema(&mut self) -> BoxFuture<'_, SessionResult<SchemaInfo>> {
        let result = self.statement("-- describe schema", |inner| {
            let tables = inner
                .tables
                .iter()
                .map(|t| TableInfo {
                    schema: "public".to_string(),
                    name: t.name.clone(),
                    row_count: inner.rows(&t.name) as f64,
                    columns: t
                        .columns
                        .iter()
                        .map(|c| ColumnInfo {
                            name: c.name.clone(),
                            data_type: c.type_info.type_name.clone(),
                        })
                        .collect(),
                })
                .collect();
            Ok(SchemaInfo::new(tables))
        });
        Box::pin(std::future::ready(result))
    }

    fn resolve_column<'a>(
        &'a mut self,
        table: &'a TableRef,
        column: &'a str,
    ) -> BoxFuture<'a, SessionResult<Option<(ColumnIdentity, ColumnTypeInfo)>>> {
        let result = self.statement(format!("-- resolve {}.{}", table, column), |inner| {
            if table.schema != "public" {
                return Ok(None);
            }
            Ok(inner.table(&table.table).and_then(|t| {
                t.columns
                    .iter()
                    .find(|c| c.name == column)
                    .map(|c| (ColumnIdentity::new(t.relid, c.attnum), c.type_info.clone()))
            }))
        });
        Box::pin(std::future::ready(result))
    }

    fn baseline_exists(&mut self, identity: ColumnIdentity) -> BoxFuture<'_, SessionResult<bool>> {
        let result = self.statement(format!("-- baseline exists {}", identity), |inner| {
            Ok(inner.state.catalog.contains_key(&identity))
        });
        Box::pin(std::future::ready(result))
    }

    fn insert_empty_baseline(
        &mut self,
        identity: ColumnIdentity,
    ) -> BoxFuture<'_, SessionResult<u64>> {
        let result = self.statement(format!("INSERT INTO pg_statistic {}", identity), |inner| {
            if inner.column_of(identity).is_none() {
                return Err(SessionError::sql("23503", format!("no column {}", identity)));
            }
            if inner.state.catalog.contains_key(&identity) {
                return Err(SessionError::sql(
                    "23505",
                    "duplicate key value violates unique constraint \"pg_statistic_relid_att_inh_index\"",
                ));
            }
            inner
                .state
                .catalog
                .insert(identity, RawCatalogRow::empty(identity));
            Ok(1)
        });
        Box::pin(std::future::ready(result))
    }

    fn write_scalars<'a>(&'a mut self, patch: &'a ScalarPatch) -> BoxFuture<'a, SessionResult<u64>> {
        let result = self.statement(format!("UPDATE pg_statistic scalars {}", patch.identity), |inner| {
            let Some(row) = inner.state.catalog.get_mut(&patch.identity) else {
                return Ok(0);
            };
            row.null_frac = patch.null_frac;
            row.avg_width = patch.avg_width;
            row.n_distinct = patch.n_distinct;
            row.slots = patch.headers.iter().map(RawSlot::from_header).collect();
            Ok(1)
        });
        Box::pin(std::future::ready(result))
    }

    fn write_values<'a>(
        &'a mut self,
        identity: ColumnIdentity,
        slot: usize,
        encoded: &'a EncodedArray,
    ) -> BoxFuture<'a, SessionResult<u64>> {
        let label = format!(
            "UPDATE pg_statistic SET stavalues{} = {} ({})",
            slot, encoded.sql, identity
        );
        let result = self.statement(label, |inner| {
            check_slot(slot)?;
            if inner.rejected_techniques.contains(&encoded.technique) {
                return Err(SessionError::sql(
                    "42804",
                    format!("cannot store {} result in anyarray column", encoded.technique),
                ));
            }
            let (table, column) = inner.column_of(identity).ok_or_else(|| {
                SessionError::sql("23503", format!("no column {}", identity))
            })?;
            let key = (table.name.clone(), column.name.clone(), slot);
            if inner.failing_values.contains(&key) {
                return Err(SessionError::sql(
                    "22P02",
                    format!("invalid input syntax for type {}", column.type_info.type_name),
                ));
            }
            if encoded.element_type_oid != column.type_info.type_oid {
                return Err(SessionError::sql(
                    "42804",
                    "array element type does not match column type",
                ));
            }
            if column.type_info.category == TypeCategory::Numeric {
                if let Some(bad) = encoded.elements.iter().find(|e| e.parse::<f64>().is_err()) {
                    return Err(SessionError::sql(
                        "22P02",
                        format!(
                            "invalid input syntax for type {}: \"{}\"",
                            column.type_info.type_name, bad
                        ),
                    ));
                }
            }
            let Some(row) = inner.state.catalog.get_mut(&identity) else {
                return Ok(0);
            };
            row.slots[slot - 1].values = Some(encoded.elements.iter().cloned().map(Some).collect());
            Ok(1)
        });
        Box::pin(std::future::ready(result))
    }

    fn clear_slot(
        &mut self,
        identity: ColumnIdentity,
        slot: usize,
    ) -> BoxFuture<'_, SessionResult<u64>> {
        let result = self.statement(format!("UPDATE pg_statistic clear slot {} ({})", slot, identity), |inner| {
            check_slot(slot)?;
            let Some(row) = inner.state.catalog.get_mut(&identity) else {
                return Ok(0);
            };
            row.slots[slot - 1] = RawSlot::default();
            Ok(1)
        });
        Box::pin(std::future::ready(result))
    }

    fn read_catalog(
        &mut self,
        identity: ColumnIdentity,
    ) -> BoxFuture<'_, SessionResult<Option<RawCatalogRow>>> {
        let result = self.statement(format!("-- read catalog {}", identity), |inner| {
            Ok(inner.state.catalog.get(&identity).cloned())
        });
        Box::pin(std::future::ready(result))
    }

    fn set_auto_refresh<'a>(
        &'a mut self,
        table: &'a TableRef,
        enabled: bool,
    ) -> BoxFuture<'a, SessionResult<()>> {
        let label = format!("ALTER TABLE {} autovacuum_enabled={}", table, enabled);
        let result = self.statement(label, |inner| {
            let name = inner.table_ref(table)?.name.clone();
            inner.state.auto_refresh.insert(name, enabled);
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }

    fn delete_table_statistics<'a>(
        &'a mut self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, SessionResult<u64>> {
        let result = self.statement(format!("DELETE FROM pg_statistic ({})", table), |inner| {
            let relid = inner.table_ref(table)?.relid;
            let before = inner.state.catalog.len();
            inner.state.catalog.retain(|k, _| k.relid != relid);
            Ok((before - inner.state.catalog.len()) as u64)
        });
        Box::pin(std::future::ready(result))
    }

    fn snapshot(&mut self) -> BoxFuture<'_, SessionResult<CatalogSnapshot>> {
        let result = self.statement("-- snapshot", |inner| {
            let mut planner = Vec::new();
            let mut raw = Vec::new();
            let mut tables: Vec<&MemTable> = inner.tables.iter().collect();
            tables.sort_by(|a, b| a.name.cmp(&b.name));
            for table in tables {
                let mut by_name: Vec<&MemColumn> = table.columns.iter().collect();
                by_name.sort_by(|a, b| a.name.cmp(&b.name));
                for column in by_name {
                    let identity = ColumnIdentity::new(table.relid, column.attnum);
                    if let Some(row) = inner.state.catalog.get(&identity) {
                        planner.push(PlannerStatsRow::from_raw(
                            "public",
                            &table.name,
                            &column.name,
                            row,
                        ));
                    }
                }
                for column in &table.columns {
                    let identity = ColumnIdentity::new(table.relid, column.attnum);
                    if let Some(row) = inner.state.catalog.get(&identity) {
                        raw.push(row.clone());
                    }
                }
            }
            Ok(CatalogSnapshot { planner, raw })
        });
        Box::pin(std::future::ready(result))
    }
}

#[derive(Debug, Default)]
struct ClusterInner {
    template: MemoryDatabase,
    databases: BTreeMap<String, MemoryDatabase>,
    history: Vec<(String, MemoryDatabase)>,
    dropped: Vec<String>,
    loaded: Vec<(String, PathBuf)>,
    fail_create: bool,
    fail_load: bool,
}

/// In-memory server: provisions forks of a template database
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<ClusterInner>>,
}

impl MemoryCluster {
    /// Every created database starts as a fork of `template`
    pub fn new(template: MemoryDatabase) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClusterInner {
                template,
                ..ClusterInner::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_create(&self) {
        self.lock().fail_create = true;
    }

    pub fn fail_load(&self) {
        self.lock().fail_load = true;
    }

    /// A live database
    pub fn database(&self, name: &str) -> Option<MemoryDatabase> {
        self.lock().databases.get(name).cloned()
    }

    /// The most recently created database, even if it has been dropped since
    pub fn last_created(&self) -> Option<(String, MemoryDatabase)> {
        self.lock().history.last().cloned()
    }

    pub fn live_databases(&self) -> Vec<String> {
        self.lock().databases.keys().cloned().collect()
    }

    pub fn dropped(&self) -> Vec<String> {
        self.lock().dropped.clone()
    }

    pub fn loaded(&self) -> Vec<(String, PathBuf)> {
        self.lock().loaded.clone()
    }
}

impl Provisioner for MemoryCluster {
    fn create<'a>(&'a self, name: &'a str) -> BoxFuture<'a, SessionResult<()>> {
        let result = (|| {
            let mut inner = self.lock();
            if inner.fail_create {
                return Err(SessionError::Provisioning(format!(
                    "could not create database \"{}\"",
                    name
                )));
            }
            if inner.databases.contains_key(name) {
                return Ok(());
            }
            let db = inner.template.fork();
            inner.databases.insert(name.to_string(), db.clone());
            inner.history.push((name.to_string(), db));
            Ok(())
        })();
        Box::pin(std::future::ready(result))
    }

    fn drop_database<'a>(&'a self, name: &'a str) -> BoxFuture<'a, SessionResult<()>> {
        let mut inner = self.lock();
        inner.databases.remove(name);
        inner.dropped.push(name.to_string());
        Box::pin(std::future::ready(Ok(())))
    }

    fn load<'a>(&'a self, name: &'a str, dump: &'a Path) -> BoxFuture<'a, SessionResult<()>> {
        let result = (|| {
            let mut inner = self.lock();
            if inner.fail_load {
                return Err(SessionError::Provisioning(format!(
                    "loading {} failed",
                    dump.display()
                )));
            }
            if !inner.databases.contains_key(name) {
                return Err(SessionError::Provisioning(format!(
                    "database \"{}\" does not exist",
                    name
                )));
            }
            inner.loaded.push((name.to_string(), dump.to_path_buf()));
            Ok(())
        })();
        Box::pin(std::future::ready(result))
    }
}

impl Connector for MemoryCluster {
    fn connect<'a>(&'a self, database: &'a str) -> BoxFuture<'a, SessionResult<Box<dyn Session>>> {
        let result = self
            .database(database)
            .map(|db| Box::new(db) as Box<dyn Session>)
            .ok_or_else(|| {
                SessionError::Connection(format!("database \"{}\" does not exist", database))
            });
        Box::pin(std::future::ready(result))
    }
}
