//! Column identity resolution
//!
//! (schema, table, column) is resolved to (relid, attnum) plus type
//! metadata once per column and cached, misses included.

use std::collections::HashMap;

use super::errors::CatalogResult;
use super::row::{ColumnIdentity, ColumnTypeInfo, TableRef};
use crate::session::Session;

type Resolved = Option<(ColumnIdentity, ColumnTypeInfo)>;

/// Caching resolver
#[derive(Debug, Default)]
pub struct IdentityResolver {
    cache: HashMap<(TableRef, String), Resolved>,
    lookups: usize,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a column; None means it does not exist
    pub async fn resolve(
        &mut self,
        session: &mut dyn Session,
        table: &TableRef,
        column: &str,
    ) -> CatalogResult<Resolved> {
        let key = (table.clone(), column.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        self.lookups += 1;
        let resolved = session.resolve_column(table, column).await?;
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Round trips made to the server so far
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
