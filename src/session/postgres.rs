//! # PostgreSQL Session
//!
//! `Session` over a `tokio_postgres::Client`. Catalog access goes straight
//! to `pg_statistic`, which requires a superuser connection.

use futures_util::future::BoxFuture;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, SimpleQueryMessage};

use super::backend::{check_slot, Session, TxControl};
use super::errors::{SessionError, SessionResult};
use crate::catalog::{
    CatalogSnapshot, ColumnIdentity, ColumnTypeInfo, EncodedArray, PlannerStatsRow, RawCatalogRow,
    RawSlot, ScalarPatch, TableRef, TypeCategory, SLOT_COUNT,
};
use crate::estimate::{ColumnInfo, SchemaInfo, TableInfo};
use crate::observability::Logger;
use crate::pgtext::{is_plain_identifier, parse_array_text, quote_ident, quote_literal};

const DESCRIBE_SCHEMA: &str = "\
SELECT c.relname::text, c.reltuples::float8, a.attname::text, format_type(a.atttypid, a.atttypmod)
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
WHERE n.nspname = 'public' AND c.relkind IN ('r', 'p')
ORDER BY c.relname, a.attnum";

const RESOLVE_COLUMN: &str = "\
SELECT a.attrelid, a.attnum, a.atttypid, format_type(a.atttypid, NULL),
       t.typcategory::text,
       CASE WHEN t.typarray <> 0 THEN format_type(t.typarray, NULL) END,
       COALESCE((SELECT o.amopopr FROM pg_amop o
                 WHERE o.amopfamily = cls.opcfamily AND o.amoplefttype = cls.opcintype
                   AND o.amoprighttype = cls.opcintype AND o.amopstrategy = 1
                 LIMIT 1), 0::oid),
       COALESCE((SELECT o.amopopr FROM pg_amop o
                 WHERE o.amopfamily = cls.opcfamily AND o.amoplefttype = cls.opcintype
                   AND o.amoprighttype = cls.opcintype AND o.amopstrategy = 3
                 LIMIT 1), 0::oid),
       a.attcollation
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_type t ON t.oid = a.atttypid
LEFT JOIN LATERAL (
    SELECT oc.opcfamily, oc.opcintype
    FROM pg_opclass oc
    JOIN pg_am am ON am.oid = oc.opcmethod
    WHERE am.amname = 'btree' AND oc.opcdefault
      AND (oc.opcintype = a.atttypid
           OR EXISTS (SELECT 1 FROM pg_cast pc
                      WHERE pc.castsource = a.atttypid AND pc.casttarget = oc.opcintype
                        AND pc.castmethod = 'b'))
    ORDER BY oc.opcintype = a.atttypid DESC
    LIMIT 1
) cls ON true
WHERE n.nspname::text = $1 AND c.relname::text = $2 AND a.attname::text = $3
  AND a.attnum > 0 AND NOT a.attisdropped";

const PLANNER_VIEW: &str = "\
SELECT schemaname::text, tablename::text, attname::text, null_frac, avg_width, n_distinct,
       most_common_vals::text, most_common_freqs, histogram_bounds::text, correlation
FROM pg_stats
WHERE schemaname = 'public'
ORDER BY tablename, attname";

const EMPTY_BASELINE: &str = "\
INSERT INTO pg_statistic (starelid, staattnum, stainherit, stanullfrac, stawidth, stadistinct,
    stakind1, stakind2, stakind3, stakind4, stakind5,
    staop1, staop2, staop3, staop4, staop5,
    stacoll1, stacoll2, stacoll3, stacoll4, stacoll5,
    stanumbers1, stanumbers2, stanumbers3, stanumbers4, stanumbers5,
    stavalues1, stavalues2, stavalues3, stavalues4, stavalues5)
VALUES ($1, $2, false, 0, 0, 0,
    0, 0, 0, 0, 0,
    0, 0, 0, 0, 0,
    0, 0, 0, 0, 0,
    NULL, NULL, NULL, NULL, NULL,
    NULL, NULL, NULL, NULL, NULL)";

/// `stanullfrac, stawidth, stadistinct` then five
/// `stakindN, staopN, stacollN, stanumbersN, stavaluesN::text` groups
fn catalog_columns(prefix: &str) -> String {
    let mut cols = vec![
        format!("{}stanullfrac", prefix),
        format!("{}stawidth", prefix),
        format!("{}stadistinct", prefix),
    ];
    for n in 1..=SLOT_COUNT {
        cols.push(format!("{}stakind{}", prefix, n));
        cols.push(format!("{}staop{}", prefix, n));
        cols.push(format!("{}stacoll{}", prefix, n));
        cols.push(format!("{}stanumbers{}", prefix, n));
        cols.push(format!("{}stavalues{}::text", prefix, n));
    }
    cols.join(", ")
}

fn parse_values(text: Option<String>) -> SessionResult<Option<Vec<Option<String>>>> {
    text.map(|t| parse_array_text(&t).map_err(|e| SessionError::Protocol(e.to_string())))
        .transpose()
}

/// Decode catalog columns starting at `offset` (see [`catalog_columns`])
fn decode_raw_row(row: &Row, identity: ColumnIdentity, offset: usize) -> SessionResult<RawCatalogRow> {
    let mut slots = Vec::with_capacity(SLOT_COUNT);
    for n in 0..SLOT_COUNT {
        let base = offset + 3 + n * 5;
        slots.push(RawSlot {
            kind: row.try_get(base)?,
            operator: row.try_get(base + 1)?,
            collation: row.try_get(base + 2)?,
            numbers: row.try_get(base + 3)?,
            values: parse_values(row.try_get(base + 4)?)?,
        });
    }
    Ok(RawCatalogRow {
        relid: identity.relid,
        attnum: identity.attnum,
        null_frac: row.try_get(offset)?,
        avg_width: row.try_get(offset + 1)?,
        n_distinct: row.try_get(offset + 2)?,
        slots,
    })
}

/// A PostgreSQL session
pub struct PgSession {
    client: Client,
}

impl PgSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect and drive the connection on a background task
    pub async fn connect(url: &str) -> SessionResult<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                Logger::error("SESSION_CONNECTION_LOST", &[("error", &e.to_string())]);
            }
        });
        Ok(Self::new(client))
    }

    async fn batch(&self, sql: &str) -> SessionResult<()> {
        Logger::trace("SQL_STATEMENT", &[("sql", sql)]);
        self.client.batch_execute(sql).await?;
        Ok(())
    }
}

impl Session for PgSession {
    fn transaction(&mut self, control: TxControl) -> BoxFuture<'_, SessionResult<()>> {
        Box::pin(async move {
            let sql = control.sql()?;
            self.batch(&sql).await
        })
    }

    fn set_parameter<'a>(
        &'a mut self,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            if !is_plain_identifier(name) {
                return Err(SessionError::InvalidIdentifier(name.to_string()));
            }
            self.batch(&format!("SET {} = {}", name, quote_literal(value)))
                .await
        })
    }

    fn discard_all(&mut self) -> BoxFuture<'_, SessionResult<()>> {
        Box::pin(async move { self.batch("DISCARD ALL").await })
    }

    fn reset_counters(&mut self) -> BoxFuture<'_, SessionResult<()>> {
        Box::pin(async move {
            self.batch("SELECT pg_stat_reset(); SELECT pg_stat_reset_shared('bgwriter')")
                .await
        })
    }

    fn reset_statement_stats(&mut self) -> BoxFuture<'_, SessionResult<bool>> {
        Box::pin(async move {
            match self.batch("SELECT pg_stat_statements_reset()").await {
                Ok(()) => Ok(true),
                Err(SessionError::Sql { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        })
    }

    fn analyze(&mut self, verbose: bool) -> BoxFuture<'_, SessionResult<()>> {
        Box::pin(async move {
            self.batch(if verbose { "ANALYZE VERBOSE" } else { "ANALYZE" })
                .await
        })
    }

    fn set_statistics_target<'a>(
        &'a mut self,
        table: &'a TableRef,
        column: &'a str,
        target: i32,
    ) -> BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let sql = format!(
                "ALTER TABLE {} ALTER COLUMN {} SET STATISTICS {}",
                table.quoted(),
                quote_ident(column),
                target
            );
            self.batch(&sql).await
        })
    }

    fn explain<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, SessionResult<serde_json::Value>> {
        Box::pin(async move {
            let row = self
                .client
                .query_one(&format!("EXPLAIN (FORMAT JSON) {}", query), &[])
                .await?;
            Ok(row.try_get::<_, serde_json::Value>(0)?)
        })
    }

    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, SessionResult<u64>> {
        Box::pin(async move {
            let messages = self.client.simple_query(query).await?;
            let mut rows = 0;
            for message in messages {
                if let SimpleQueryMessage::CommandComplete(n) = message {
                    rows = n;
                }
            }
            Ok(rows)
        })
    }

    fn describe_schema(&mut self) -> BoxFuture<'_, SessionResult<SchemaInfo>> {
        Box::pin(async move {
            let rows = self.client.query(DESCRIBE_SCHEMA, &[]).await?;
            let mut tables: Vec<TableInfo> = Vec::new();
            for row in rows {
                let table: String = row.try_get(0)?;
                let column = ColumnInfo {
                    name: row.try_get(2)?,
                    data_type: row.try_get(3)?,
                };
                match tables.last_mut() {
                    Some(last) if last.name == table => last.columns.push(column),
                    _ => tables.push(TableInfo {
                        schema: "public".to_string(),
                        name: table,
                        row_count: row.try_get(1)?,
                        columns: vec![column],
                    }),
                }
            }
            Ok(SchemaInfo::new(tables))
        })
    }

    fn resolve_column<'a>(
        &'a mut self,
        table: &'a TableRef,
        column: &'a str,
    ) -> BoxFuture<'a, SessionResult<Option<(ColumnIdentity, ColumnTypeInfo)>>> {
        Box::pin(async move {
            let row = self
                .client
                .query_opt(RESOLVE_COLUMN, &[&table.schema, &table.table, &column])
                .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            let category: String = row.try_get(4)?;
            let identity = ColumnIdentity::new(row.try_get(0)?, row.try_get(1)?);
            let info = ColumnTypeInfo {
                type_oid: row.try_get(2)?,
                type_name: row.try_get(3)?,
                category: TypeCategory::from_code(category.chars().next().unwrap_or('X')),
                array_type_name: row.try_get(5)?,
                lt_operator: row.try_get(6)?,
                eq_operator: row.try_get(7)?,
                collation: row.try_get(8)?,
            };
            Ok(Some((identity, info)))
        })
    }

    fn baseline_exists(&mut self, identity: ColumnIdentity) -> BoxFuture<'_, SessionResult<bool>> {
        Box::pin(async move {
            let row = self
                .client
                .query_one(
                    "SELECT EXISTS (SELECT 1 FROM pg_statistic \
                     WHERE starelid = $1 AND staattnum = $2 AND NOT stainherit)",
                    &[&identity.relid, &identity.attnum],
                )
                .await?;
            Ok(row.try_get(0)?)
        })
    }

    fn insert_empty_baseline(
        &mut self,
        identity: ColumnIdentity,
    ) -> BoxFuture<'_, SessionResult<u64>> {
        Box::pin(async move {
            Ok(self
                .client
                .execute(EMPTY_BASELINE, &[&identity.relid, &identity.attnum])
                .await?)
        })
    }

    fn write_scalars<'a>(&'a mut self, patch: &'a ScalarPatch) -> BoxFuture<'a, SessionResult<u64>> {
        Box::pin(async move {
            let mut assignments = vec![
                "stanullfrac = $3".to_string(),
                "stawidth = $4".to_string(),
                "stadistinct = $5".to_string(),
            ];
            let mut params: Vec<&(dyn ToSql + Sync)> = vec![
                &patch.identity.relid,
                &patch.identity.attnum,
                &patch.null_frac,
                &patch.avg_width,
                &patch.n_distinct,
            ];
            for (i, header) in patch.headers.iter().enumerate() {
                let n = i + 1;
                let p = params.len() + 1;
                assignments.push(format!("stakind{} = ${}", n, p));
                assignments.push(format!("staop{} = ${}", n, p + 1));
                assignments.push(format!("stacoll{} = ${}", n, p + 2));
                assignments.push(format!("stanumbers{} = ${}", n, p + 3));
                assignments.push(format!("stavalues{} = NULL", n));
                params.push(&header.kind);
                params.push(&header.operator);
                params.push(&header.collation);
                params.push(&header.numbers);
            }
            let sql = format!(
                "UPDATE pg_statistic SET {} WHERE starelid = $1 AND staattnum = $2 AND NOT stainherit",
                assignments.join(", ")
            );
            Ok(self.client.execute(sql.as_str(), &params).await?)
        })
    }

    fn write_values<'a>(
        &'a mut self,
        identity: ColumnIdentity,
        slot: usize,
        encoded: &'a EncodedArray,
    ) -> BoxFuture<'a, SessionResult<u64>> {
        Box::pin(async move {
            check_slot(slot)?;
            let sql = format!(
                "UPDATE pg_statistic SET stavalues{} = {} \
                 WHERE starelid = $1 AND staattnum = $2 AND NOT stainherit",
                slot, encoded.sql
            );
            Logger::trace("SQL_STATEMENT", &[("sql", &sql)]);
            Ok(self
                .client
                .execute(sql.as_str(), &[&identity.relid, &identity.attnum])
                .await?)
        })
    }

    fn clear_slot(
        &mut self,
        identity: ColumnIdentity,
        slot: usize,
    ) -> BoxFuture<'_, SessionResult<u64>> {
        Box::pin(async move {
            check_slot(slot)?;
            let sql = format!(
                "UPDATE pg_statistic SET stakind{n} = 0, staop{n} = 0, stacoll{n} = 0, \
                 stanumbers{n} = NULL, stavalues{n} = NULL \
                 WHERE starelid = $1 AND staattnum = $2 AND NOT stainherit",
                n = slot
            );
            Ok(self
                .client
                .execute(sql.as_str(), &[&identity.relid, &identity.attnum])
                .await?)
        })
    }

    fn read_catalog(
        &mut self,
        identity: ColumnIdentity,
    ) -> BoxFuture<'_, SessionResult<Option<RawCatalogRow>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {} FROM pg_statistic \
                 WHERE starelid = $1 AND staattnum = $2 AND NOT stainherit",
                catalog_columns("")
            );
            let row = self
                .client
                .query_opt(sql.as_str(), &[&identity.relid, &identity.attnum])
                .await?;
            row.map(|r| decode_raw_row(&r, identity, 0)).transpose()
        })
    }

    fn set_auto_refresh<'a>(
        &'a mut self,
        table: &'a TableRef,
        enabled: bool,
    ) -> BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let sql = if enabled {
                format!("ALTER TABLE {} RESET (autovacuum_enabled)", table.quoted())
            } else {
                format!(
                    "ALTER TABLE {} SET (autovacuum_enabled = false)",
                    table.quoted()
                )
            };
            self.batch(&sql).await
        })
    }

    fn delete_table_statistics<'a>(
        &'a mut self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, SessionResult<u64>> {
        Box::pin(async move {
            let name = table.quoted();
            Ok(self
                .client
                .execute(
                    "DELETE FROM pg_statistic WHERE starelid = $1::text::regclass",
                    &[&name],
                )
                .await?)
        })
    }

    fn snapshot(&mut self) -> BoxFuture<'_, SessionResult<CatalogSnapshot>> {
        Box::pin(async move {
            let mut planner = Vec::new();
            for row in self.client.query(PLANNER_VIEW, &[]).await? {
                planner.push(PlannerStatsRow {
                    schema: row.try_get(0)?,
                    table: row.try_get(1)?,
                    column: row.try_get(2)?,
                    null_frac: row.try_get(3)?,
                    avg_width: row.try_get(4)?,
                    n_distinct: row.try_get(5)?,
                    most_common_vals: parse_values(row.try_get(6)?)?,
                    most_common_freqs: row.try_get(7)?,
                    histogram_bounds: parse_values(row.try_get(8)?)?,
                    correlation: row.try_get(9)?,
                });
            }

            let sql = format!(
                "SELECT s.starelid, s.staattnum, {} FROM pg_statistic s \
                 JOIN pg_class c ON c.oid = s.starelid \
                 JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = 'public' AND NOT s.stainherit \
                 ORDER BY c.relname, s.staattnum",
                catalog_columns("s.")
            );
            let mut raw = Vec::new();
            for row in self.client.query(sql.as_str(), &[]).await? {
                let identity = ColumnIdentity::new(row.try_get(0)?, row.try_get(1)?);
                raw.push(decode_raw_row(&row, identity, 2)?);
            }
            Ok(CatalogSnapshot { planner, raw })
        })
    }
}
