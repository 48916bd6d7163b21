//! Values-array encoding chain
//!
//! `stavaluesN` is `anyarray`: the server only accepts a value whose array
//! element type matches the described column. Each technique below renders
//! the values as a SQL expression producing such an array. The writer tries
//! them in [`CHAIN`] order inside a savepoint and keeps the first one the
//! server accepts.
//!
//! Techniques are pure: they only build SQL and never touch a session.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::EncodingError;
use super::row::{ColumnTypeInfo, TypeCategory};
use crate::pgtext::{format_array_text, quote_literal};

/// One way of producing a typed array expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodingTechnique {
    /// `array_in('{..}'::cstring, <elem oid>, -1)`
    ArrayIn,
    /// `'{..}'::<array type>`
    TypedCast,
    /// `string_to_array('a,b', ',')::<array type>` for numeric types
    ScalarList,
}

impl EncodingTechnique {
    pub fn as_str(self) -> &'static str {
        match self {
            EncodingTechnique::ArrayIn => "array_in",
            EncodingTechnique::TypedCast => "typed_cast",
            EncodingTechnique::ScalarList => "scalar_list",
        }
    }

    /// Build the expression for `values`
    pub fn encode(
        self,
        values: &[String],
        type_info: &ColumnTypeInfo,
    ) -> Result<EncodedArray, EncodingError> {
        match self {
            EncodingTechnique::ArrayIn => encode_array_in(values, type_info),
            EncodingTechnique::TypedCast => encode_typed_cast(values, type_info),
            EncodingTechnique::ScalarList => encode_scalar_list(values, type_info),
        }
    }
}

impl fmt::Display for EncodingTechnique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fallback order
pub const CHAIN: [EncodingTechnique; 3] = [
    EncodingTechnique::ArrayIn,
    EncodingTechnique::TypedCast,
    EncodingTechnique::ScalarList,
];

/// Chain order with `preferred` moved to the front
pub fn chain_preferring(preferred: Option<EncodingTechnique>) -> Vec<EncodingTechnique> {
    let mut order = CHAIN.to_vec();
    if let Some(first) = preferred {
        order.retain(|t| *t != first);
        order.insert(0, first);
    }
    order
}

/// An encoded values array
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedArray {
    pub technique: EncodingTechnique,
    /// SQL expression yielding the typed array
    pub sql: String,
    /// Normalized element text, as the server should read it back
    pub elements: Vec<String>,
    /// Element type the expression produces
    pub element_type_oid: u32,
}

/// Normalize element text for the column type: integral floats become
/// integers for integer columns (`"3.0"` -> `"3"`), booleans are lowercased.
pub fn normalize_elements(values: &[String], type_info: &ColumnTypeInfo) -> Vec<String> {
    values
        .iter()
        .map(|v| {
            let v = v.trim();
            if type_info.is_integer() {
                if let Ok(f) = v.parse::<f64>() {
                    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                        return format!("{}", f as i64);
                    }
                }
            }
            if type_info.category == TypeCategory::Boolean {
                return v.to_ascii_lowercase();
            }
            v.to_string()
        })
        .collect()
}

fn literal_of(elements: &[String]) -> String {
    let wrapped: Vec<Option<String>> = elements.iter().cloned().map(Some).collect();
    quote_literal(&format_array_text(&wrapped))
}

fn array_type<'a>(
    technique: EncodingTechnique,
    type_info: &'a ColumnTypeInfo,
) -> Result<&'a str, EncodingError> {
    type_info
        .array_type_name
        .as_deref()
        .ok_or_else(|| EncodingError::NotApplicable {
            technique,
            reason: format!("type {} has no array type", type_info.type_name),
        })
}

pub fn encode_array_in(
    values: &[String],
    type_info: &ColumnTypeInfo,
) -> Result<EncodedArray, EncodingError> {
    if type_info.type_oid == 0 {
        return Err(EncodingError::NotApplicable {
            technique: EncodingTechnique::ArrayIn,
            reason: "element type oid unknown".to_string(),
        });
    }
    let elements = normalize_elements(values, type_info);
    let sql = format!(
        "array_in({}::cstring, {}::oid, -1)",
        literal_of(&elements),
        type_info.type_oid
    );
    Ok(EncodedArray {
        technique: EncodingTechnique::ArrayIn,
        sql,
        elements,
        element_type_oid: type_info.type_oid,
    })
}

pub fn encode_typed_cast(
    values: &[String],
    type_info: &ColumnTypeInfo,
) -> Result<EncodedArray, EncodingError> {
    let array_type = array_type(EncodingTechnique::TypedCast, type_info)?;
    let elements = normalize_elements(values, type_info);
    let sql = format!("{}::{}", literal_of(&elements), array_type);
    Ok(EncodedArray {
        technique: EncodingTechnique::TypedCast,
        sql,
        elements,
        element_type_oid: type_info.type_oid,
    })
}

pub fn encode_scalar_list(
    values: &[String],
    type_info: &ColumnTypeInfo,
) -> Result<EncodedArray, EncodingError> {
    let technique = EncodingTechnique::ScalarList;
    if type_info.category != TypeCategory::Numeric {
        return Err(EncodingError::NotApplicable {
            technique,
            reason: format!("type {} is not numeric", type_info.type_name),
        });
    }
    let array_type = array_type(technique, type_info)?;
    let elements = normalize_elements(values, type_info);
    if let Some(bad) = elements
        .iter()
        .find(|e| e.parse::<f64>().map(|f| !f.is_finite()).unwrap_or(true))
    {
        return Err(EncodingError::NotApplicable {
            technique,
            reason: format!("element '{}' is not a finite number", bad),
        });
    }
    let sql = format!(
        "string_to_array({}, ',')::{}",
        quote_literal(&elements.join(",")),
        array_type
    );
    Ok(EncodedArray {
        technique,
        sql,
        elements,
        element_type_oid: type_info.type_oid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_info(oid: u32, name: &str, category: TypeCategory) -> ColumnTypeInfo {
        ColumnTypeInfo {
            type_oid: oid,
            type_name: name.to_string(),
            category,
            array_type_name: Some(format!("{}[]", name)),
            lt_operator: 1,
            eq_operator: 2,
            collation: 0,
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_array_in_uses_element_oid() {
        let info = type_info(23, "integer", TypeCategory::Numeric);
        let encoded = encode_array_in(&strings(&["1", "2.0"]), &info).unwrap();
        assert_eq!(encoded.sql, r#"array_in('{"1","2"}'::cstring, 23::oid, -1)"#);
        assert_eq!(encoded.elements, strings(&["1", "2"]));
    }

    #[test]
    fn test_typed_cast_quotes_text() {
        let info = type_info(25, "text", TypeCategory::String);
        let encoded = encode_typed_cast(&strings(&["it's", "a,b"]), &info).unwrap();
        assert_eq!(encoded.sql, r#"'{"it''s","a,b"}'::text[]"#);
    }

    #[test]
    fn test_typed_cast_needs_array_type() {
        let mut info = type_info(99999, "widget", TypeCategory::Other);
        info.array_type_name = None;
        assert!(matches!(
            encode_typed_cast(&strings(&["x"]), &info),
            Err(EncodingError::NotApplicable {
                technique: EncodingTechnique::TypedCast,
                ..
            })
        ));
    }

    #[test]
    fn test_scalar_list_only_for_numbers() {
        let numeric = type_info(1700, "numeric", TypeCategory::Numeric);
        let encoded = encode_scalar_list(&strings(&["1.5", "2.25"]), &numeric).unwrap();
        assert_eq!(encoded.sql, "string_to_array('1.5,2.25', ',')::numeric[]");

        let text = type_info(25, "text", TypeCategory::String);
        assert!(encode_scalar_list(&strings(&["a"]), &text).is_err());
        assert!(encode_scalar_list(&strings(&["1", "x"]), &numeric).is_err());
    }

    #[test]
    fn test_normalization() {
        let int = type_info(23, "integer", TypeCategory::Numeric);
        assert_eq!(
            normalize_elements(&strings(&["3.0", " 4 ", "5.5"]), &int),
            strings(&["3", "4", "5.5"])
        );
        let boolean = type_info(16, "boolean", TypeCategory::Boolean);
        assert_eq!(normalize_elements(&strings(&["True"]), &boolean), strings(&["true"]));
    }

    #[test]
    fn test_chain_preferring() {
        assert_eq!(chain_preferring(None), CHAIN.to_vec());
        assert_eq!(
            chain_preferring(Some(EncodingTechnique::ScalarList)),
            vec![
                EncodingTechnique::ScalarList,
                EncodingTechnique::ArrayIn,
                EncodingTechnique::TypedCast
            ]
        );
    }
}
