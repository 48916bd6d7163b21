//! Estimate types
//!
//! `RawEstimate` is what a provider hands over: loosely typed, untrusted.
//! `ColumnEstimate` is what the sanitizer emits and the translator consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scalar statistics value as it appears in provider output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StatValue {
    /// Scalar JSON values only; null, arrays and objects are not values
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(StatValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(StatValue::Int)
                .or_else(|| n.as_f64().map(StatValue::Float)),
            Value::String(s) => Some(StatValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Text form, as the server's array input would read it
    pub fn as_text(&self) -> String {
        match self {
            StatValue::Bool(b) => b.to_string(),
            StatValue::Int(i) => i.to_string(),
            StatValue::Float(f) => f.to_string(),
            StatValue::Text(s) => s.clone(),
        }
    }
}

/// One provider row, before validation
///
/// The column is named either by `attname` (`"table.column"`,
/// `"schema.table.column"` or a bare `"column"`) or by separate
/// `table`/`column` keys. Numeric fields may be numbers or numeric strings;
/// array fields may be JSON arrays or PostgreSQL array literals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEstimate {
    #[serde(default)]
    pub attname: Option<String>,
    #[serde(default, alias = "schemaname")]
    pub schema: Option<String>,
    #[serde(default, alias = "tablename")]
    pub table: Option<String>,
    #[serde(default, alias = "colname")]
    pub column: Option<String>,
    #[serde(default)]
    pub null_frac: Option<Value>,
    #[serde(default)]
    pub avg_width: Option<Value>,
    #[serde(default)]
    pub n_distinct: Option<Value>,
    #[serde(default)]
    pub most_common_vals: Option<Value>,
    #[serde(default)]
    pub most_common_freqs: Option<Value>,
    #[serde(default)]
    pub histogram_bounds: Option<Value>,
    #[serde(default)]
    pub correlation: Option<Value>,
}

impl RawEstimate {
    /// Identifier used in logs
    pub fn label(&self) -> String {
        if let Some(attname) = &self.attname {
            return attname.clone();
        }
        match (&self.table, &self.column) {
            (Some(t), Some(c)) => format!("{}.{}", t, c),
            (None, Some(c)) => c.clone(),
            (Some(t), None) => format!("{}.?", t),
            (None, None) => "?".to_string(),
        }
    }
}

/// A sanitized per-column estimate
///
/// Invariants after sanitization:
/// - `null_frac` in [0, 1], `correlation` in [-1, 1] when present
/// - `avg_width >= 1`
/// - `most_common_vals.len() == most_common_freqs.len()` and the
///   frequencies sum to at most 1
/// - `histogram_bounds` is empty or has at least two bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEstimate {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub null_frac: f64,
    pub avg_width: i32,
    /// Positive: distinct count. Negative: minus the distinct fraction.
    /// Zero: unknown.
    pub n_distinct: f64,
    pub most_common_vals: Vec<String>,
    pub most_common_freqs: Vec<f64>,
    pub histogram_bounds: Vec<String>,
    pub correlation: Option<f64>,
}

impl ColumnEstimate {
    pub fn new(schema: &str, table: &str, column: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            null_frac: 0.0,
            avg_width: 4,
            n_distinct: 0.0,
            most_common_vals: Vec::new(),
            most_common_freqs: Vec::new(),
            histogram_bounds: Vec::new(),
            correlation: None,
        }
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    pub fn has_mcv(&self) -> bool {
        !self.most_common_vals.is_empty()
    }

    pub fn has_histogram(&self) -> bool {
        self.histogram_bounds.len() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stat_value_text() {
        assert_eq!(StatValue::from_json(&json!(3)).unwrap().as_text(), "3");
        assert_eq!(StatValue::from_json(&json!(2.5)).unwrap().as_text(), "2.5");
        assert_eq!(StatValue::from_json(&json!(true)).unwrap().as_text(), "true");
        assert_eq!(StatValue::from_json(&json!("EU")).unwrap().as_text(), "EU");
        assert!(StatValue::from_json(&json!(null)).is_none());
        assert!(StatValue::from_json(&json!([1])).is_none());
    }

    #[test]
    fn test_raw_estimate_aliases() {
        let raw: RawEstimate = serde_json::from_value(json!({
            "tablename": "orders",
            "colname": "amount",
            "null_frac": "0.1"
        }))
        .unwrap();
        assert_eq!(raw.table.as_deref(), Some("orders"));
        assert_eq!(raw.column.as_deref(), Some("amount"));
        assert_eq!(raw.label(), "orders.amount");
    }
}
