//! Catalog row model
//!
//! A `CatalogSlotRow` is the translated form of one column estimate: the
//! scalar fields plus up to five tagged slots, ready for the writer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{CatalogError, CatalogResult};
use super::kind::{StatsKind, SLOT_COUNT};
use crate::pgtext::quote_qualified;

/// (relation id, attribute number) of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnIdentity {
    pub relid: u32,
    pub attnum: i16,
}

impl ColumnIdentity {
    pub fn new(relid: u32, attnum: i16) -> Self {
        Self { relid, attnum }
    }
}

impl fmt::Display for ColumnIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.relid, self.attnum)
    }
}

/// A schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Table in the `public` schema
    pub fn public(table: impl Into<String>) -> Self {
        Self::new("public", table)
    }

    /// Quoted `"schema"."table"` for embedding in statements
    pub fn quoted(&self) -> String {
        quote_qualified(&self.schema, &self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// The server's `typcategory`, reduced to what encoding cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeCategory {
    Numeric,
    String,
    Boolean,
    DateTime,
    Other,
}

impl TypeCategory {
    /// Map a `pg_type.typcategory` code
    pub fn from_code(code: char) -> Self {
        match code {
            'N' => TypeCategory::Numeric,
            'S' => TypeCategory::String,
            'B' => TypeCategory::Boolean,
            'D' => TypeCategory::DateTime,
            _ => TypeCategory::Other,
        }
    }
}

/// Type metadata of a described column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTypeInfo {
    /// Element type oid (`atttypid`)
    pub type_oid: u32,
    /// `format_type` rendering, e.g. `integer`
    pub type_name: String,
    pub category: TypeCategory,
    /// Array type name, e.g. `integer[]`; None if the type has no array type
    pub array_type_name: Option<String>,
    /// Default btree `<` operator, 0 if the type is not sortable
    pub lt_operator: u32,
    /// Default `=` operator, 0 if none
    pub eq_operator: u32,
    /// Column collation, 0 for non-collatable types
    pub collation: u32,
}

impl ColumnTypeInfo {
    pub fn is_sortable(&self) -> bool {
        self.lt_operator != 0
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.type_oid, 20 | 21 | 23)
    }
}

/// One populated slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSlot {
    pub kind: StatsKind,
    pub operator: u32,
    pub collation: u32,
    pub numbers: Option<Vec<f32>>,
    pub values: Option<Vec<String>>,
}

/// Translated statistics for one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSlotRow {
    pub table: TableRef,
    pub column: String,
    pub identity: ColumnIdentity,
    pub type_info: ColumnTypeInfo,
    pub null_frac: f32,
    pub avg_width: i32,
    pub n_distinct: f32,
    slots: Vec<CatalogSlot>,
}

impl CatalogSlotRow {
    pub fn new(
        table: TableRef,
        column: impl Into<String>,
        identity: ColumnIdentity,
        type_info: ColumnTypeInfo,
    ) -> Self {
        Self {
            table,
            column: column.into(),
            identity,
            type_info,
            null_frac: 0.0,
            avg_width: 0,
            n_distinct: 0.0,
            slots: Vec::with_capacity(SLOT_COUNT),
        }
    }

    /// Place a slot in the next free index. Returns the 1-based slot number.
    pub fn push_slot(&mut self, slot: CatalogSlot) -> CatalogResult<usize> {
        if self.slots.len() >= SLOT_COUNT {
            return Err(CatalogError::SlotsExhausted(self.label()));
        }
        if self.slots.iter().any(|s| s.kind == slot.kind) {
            return Err(CatalogError::DuplicateKind(self.label(), slot.kind));
        }
        self.slots.push(slot);
        Ok(self.slots.len())
    }

    /// Populated slots in index order (index 0 is catalog slot 1)
    pub fn slots(&self) -> &[CatalogSlot] {
        &self.slots
    }

    /// 1-based slot number and slot of a kind
    pub fn slot(&self, kind: StatsKind) -> Option<(usize, &CatalogSlot)> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, s)| s.kind == kind)
            .map(|(i, s)| (i + 1, s))
    }

    /// `table.column` for logs and errors
    pub fn label(&self) -> String {
        format!("{}.{}", self.table.table, self.column)
    }

    /// The scalar/header update for this row
    pub fn scalar_patch(&self) -> ScalarPatch {
        let mut headers: [SlotHeader; SLOT_COUNT] = Default::default();
        for (header, slot) in headers.iter_mut().zip(&self.slots) {
            *header = SlotHeader {
                kind: slot.kind.code(),
                operator: slot.operator,
                collation: slot.collation,
                numbers: slot.numbers.clone(),
            };
        }
        ScalarPatch {
            identity: self.identity,
            null_frac: self.null_frac,
            avg_width: self.avg_width,
            n_distinct: self.n_distinct,
            headers,
        }
    }
}

/// Fixed-type part of one catalog slot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlotHeader {
    pub kind: i16,
    pub operator: u32,
    pub collation: u32,
    pub numbers: Option<Vec<f32>>,
}

/// Everything written in the single per-column scalar statement. Applying a
/// patch also nulls every values array; those are written separately.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalarPatch {
    pub identity: ColumnIdentity,
    pub null_frac: f32,
    pub avg_width: i32,
    pub n_distinct: f32,
    pub headers: [SlotHeader; SLOT_COUNT],
}
