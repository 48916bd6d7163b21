//! Field parsing for raw estimates
//!
//! Providers are inconsistent: numbers arrive as JSON numbers or strings,
//! arrays as JSON arrays or PostgreSQL literals, and absent values as
//! `null`, `""` or `"NULL"`. Everything is normalized here before the
//! sanitizer applies range rules.

use serde_json::Value;

use super::types::StatValue;
use crate::pgtext::parse_array_text;

fn is_absent_text(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s.eq_ignore_ascii_case("null")
}

/// A finite number, or None when absent or unparseable
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if !is_absent_text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Elements of an array field. Null elements stay as None so callers can
/// keep positions aligned (MCV values against frequencies).
pub fn parse_values(value: &Value) -> Result<Vec<Option<String>>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => Ok(None),
                Value::String(s) if s.trim().eq_ignore_ascii_case("null") => Ok(None),
                other => StatValue::from_json(other)
                    .map(|v| Some(v.as_text()))
                    .ok_or_else(|| format!("nested value {} in array", other)),
            })
            .collect(),
        Value::String(s) if is_absent_text(s) => Ok(Vec::new()),
        Value::String(s) => parse_array_text(s.trim()).map_err(|e| e.to_string()),
        other => Err(format!("expected an array, got {}", other)),
    }
}

/// Numeric elements of an array field; unparseable elements become None
pub fn parse_numbers(value: &Value) -> Result<Vec<Option<f64>>, String> {
    Ok(parse_values(value)?
        .into_iter()
        .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
        .collect())
}

/// A column reference split into optional schema, optional table and column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: String,
}

fn unquote(part: &str) -> Option<String> {
    let part = part.trim();
    let part = part
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(part);
    (!part.is_empty()).then(|| part.to_string())
}

/// Split `column`, `table.column` or `schema.table.column`
pub fn split_identifier(identifier: &str) -> Option<ColumnRef> {
    let parts: Vec<Option<String>> = identifier.split('.').map(unquote).collect();
    if parts.iter().any(Option::is_none) {
        return None;
    }
    let mut parts: Vec<String> = parts.into_iter().flatten().collect();
    let column = parts.pop()?;
    let table = parts.pop();
    let schema = parts.pop();
    if !parts.is_empty() {
        return None;
    }
    Some(ColumnRef {
        schema,
        table,
        column,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(&json!(0.25)), Some(0.25));
        assert_eq!(parse_number(&json!(" 1.5 ")), Some(1.5));
        assert_eq!(parse_number(&json!("NULL")), None);
        assert_eq!(parse_number(&json!("lots")), None);
        assert_eq!(parse_number(&json!("NaN")), None);
        assert_eq!(parse_number(&json!(null)), None);
    }

    #[test]
    fn test_parse_values_forms() {
        assert_eq!(
            parse_values(&json!([1, "b", null])).unwrap(),
            vec![Some("1".into()), Some("b".into()), None]
        );
        assert_eq!(
            parse_values(&json!("{a,\"b c\",NULL}")).unwrap(),
            vec![Some("a".into()), Some("b c".into()), None]
        );
        assert!(parse_values(&json!("NULL")).unwrap().is_empty());
        assert!(parse_values(&json!([[1]])).is_err());
        assert!(parse_values(&json!(5)).is_err());
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(
            parse_numbers(&json!("{0.5,x,0.25}")).unwrap(),
            vec![Some(0.5), None, Some(0.25)]
        );
    }

    #[test]
    fn test_split_identifier() {
        let r = split_identifier("orders.amount").unwrap();
        assert_eq!(r.table.as_deref(), Some("orders"));
        assert_eq!(r.column, "amount");
        assert!(r.schema.is_none());

        let r = split_identifier("public.\"orders\".amount").unwrap();
        assert_eq!(r.schema.as_deref(), Some("public"));

        assert_eq!(split_identifier("amount").unwrap().table, None);
        assert!(split_identifier("a.b.c.d").is_none());
        assert!(split_identifier("orders.").is_none());
    }
}
