//! Live schema description
//!
//! What the sanitizer validates against and what an estimate provider is
//! shown. Tables keep the order the server listed them in; that order is
//! what "first match" inference uses.

use serde::{Deserialize, Serialize};

/// One column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// One table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// Row-count estimate (`reltuples`); negative or zero means unknown
    pub row_count: f64,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    /// Known positive row count
    pub fn known_rows(&self) -> Option<f64> {
        (self.row_count > 0.0).then_some(self.row_count)
    }
}

/// Tables of one database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
}

impl SchemaInfo {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self { tables }
    }

    /// Look a table up by name, optionally restricted to a schema
    pub fn table(&self, schema: Option<&str>, name: &str) -> Option<&TableInfo> {
        let in_schema = |t: &&TableInfo| schema.map_or(true, |s| t.schema == s);
        self.tables
            .iter()
            .filter(in_schema)
            .find(|t| t.name == name)
            .or_else(|| {
                self.tables
                    .iter()
                    .filter(in_schema)
                    .find(|t| t.name.eq_ignore_ascii_case(name))
            })
    }

    /// Every table that has a column called `column`, in schema order
    pub fn tables_with_column(&self, column: &str) -> Vec<&TableInfo> {
        self.tables
            .iter()
            .filter(|t| t.column(column).is_some())
            .collect()
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}
