//! # Session Trait
//!
//! The single seam between the tool and a database. Every operation the
//! strategies, writer and orchestrator need is a semantic method here, so
//! the PostgreSQL and in-memory implementations stay interchangeable.

use futures_util::future::BoxFuture;

use super::errors::{SessionError, SessionResult};
use crate::catalog::{
    CatalogSnapshot, ColumnIdentity, ColumnTypeInfo, EncodedArray, RawCatalogRow, ScalarPatch,
    TableRef,
};
use crate::estimate::SchemaInfo;
use crate::pgtext::is_plain_identifier;

/// Transaction control statements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxControl {
    Begin,
    Commit,
    Rollback,
    Savepoint(String),
    RollbackTo(String),
    Release(String),
}

impl TxControl {
    /// Statement text. Savepoint names must be plain identifiers.
    pub fn sql(&self) -> SessionResult<String> {
        let named = |verb: &str, name: &str| {
            if is_plain_identifier(name) {
                Ok(format!("{} {}", verb, name))
            } else {
                Err(SessionError::InvalidIdentifier(name.to_string()))
            }
        };
        match self {
            TxControl::Begin => Ok("BEGIN".to_string()),
            TxControl::Commit => Ok("COMMIT".to_string()),
            TxControl::Rollback => Ok("ROLLBACK".to_string()),
            TxControl::Savepoint(name) => named("SAVEPOINT", name),
            TxControl::RollbackTo(name) => named("ROLLBACK TO SAVEPOINT", name),
            TxControl::Release(name) => named("RELEASE SAVEPOINT", name),
        }
    }
}

/// A connected database session
pub trait Session: Send {
    /// Run a transaction control statement
    fn transaction(&mut self, control: TxControl) -> BoxFuture<'_, SessionResult<()>>;

    /// `SET <name> = <value>`; the name must be a plain identifier
    fn set_parameter<'a>(
        &'a mut self,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, SessionResult<()>>;

    /// `DISCARD ALL` (drops plans, temp tables and session settings)
    fn discard_all(&mut self) -> BoxFuture<'_, SessionResult<()>>;

    /// Reset cumulative statistics counters
    fn reset_counters(&mut self) -> BoxFuture<'_, SessionResult<()>>;

    /// Reset statement statistics. Ok(false) if the extension is absent.
    fn reset_statement_stats(&mut self) -> BoxFuture<'_, SessionResult<bool>>;

    /// Built-in full recompute
    fn analyze(&mut self, verbose: bool) -> BoxFuture<'_, SessionResult<()>>;

    /// Per-column statistics target used by the next recompute
    fn set_statistics_target<'a>(
        &'a mut self,
        table: &'a TableRef,
        column: &'a str,
        target: i32,
    ) -> BoxFuture<'a, SessionResult<()>>;

    /// Plan-only probe (`EXPLAIN (FORMAT JSON)`)
    fn explain<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, SessionResult<serde_json::Value>>;

    /// Execute a workload statement; returns affected or returned rows
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, SessionResult<u64>>;

    /// Tables, columns and row estimates of the `public` schema
    fn describe_schema(&mut self) -> BoxFuture<'_, SessionResult<SchemaInfo>>;

    /// Identity and type metadata of a column, None if it does not exist
    fn resolve_column<'a>(
        &'a mut self,
        table: &'a TableRef,
        column: &'a str,
    ) -> BoxFuture<'a, SessionResult<Option<(ColumnIdentity, ColumnTypeInfo)>>>;

    fn baseline_exists(&mut self, identity: ColumnIdentity) -> BoxFuture<'_, SessionResult<bool>>;

    /// Insert a zeroed catalog row with empty slots
    fn insert_empty_baseline(
        &mut self,
        identity: ColumnIdentity,
    ) -> BoxFuture<'_, SessionResult<u64>>;

    /// Write scalars and slot headers, and null every values array
    fn write_scalars<'a>(&'a mut self, patch: &'a ScalarPatch) -> BoxFuture<'a, SessionResult<u64>>;

    /// Write one values array (1-based slot)
    fn write_values<'a>(
        &'a mut self,
        identity: ColumnIdentity,
        slot: usize,
        encoded: &'a EncodedArray,
    ) -> BoxFuture<'a, SessionResult<u64>>;

    /// Reset one slot (1-based) to unused
    fn clear_slot(&mut self, identity: ColumnIdentity, slot: usize)
        -> BoxFuture<'_, SessionResult<u64>>;

    fn read_catalog(
        &mut self,
        identity: ColumnIdentity,
    ) -> BoxFuture<'_, SessionResult<Option<RawCatalogRow>>>;

    /// Toggle the table's automatic statistics refresh
    fn set_auto_refresh<'a>(
        &'a mut self,
        table: &'a TableRef,
        enabled: bool,
    ) -> BoxFuture<'a, SessionResult<()>>;

    /// Remove every catalog row of a table
    fn delete_table_statistics<'a>(
        &'a mut self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, SessionResult<u64>>;

    /// Planner-facing and raw catalog state of the `public` schema
    fn snapshot(&mut self) -> BoxFuture<'_, SessionResult<CatalogSnapshot>>;
}

/// Validate a slot number (1..=5)
pub(crate) fn check_slot(slot: usize) -> SessionResult<()> {
    if (1..=crate::catalog::SLOT_COUNT).contains(&slot) {
        Ok(())
    } else {
        Err(SessionError::Protocol(format!("slot {} out of range", slot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_control_sql() {
        assert_eq!(TxControl::Begin.sql().unwrap(), "BEGIN");
        assert_eq!(
            TxControl::RollbackTo("enc_1".into()).sql().unwrap(),
            "ROLLBACK TO SAVEPOINT enc_1"
        );
        assert!(matches!(
            TxControl::Savepoint("x; DROP TABLE t".into()).sql(),
            Err(SessionError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_check_slot() {
        assert!(check_slot(1).is_ok());
        assert!(check_slot(5).is_ok());
        assert!(check_slot(0).is_err());
        assert!(check_slot(6).is_err());
    }
}
