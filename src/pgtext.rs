//! PostgreSQL text-format helpers
//!
//! Array literal input/output (`{a,"b c",NULL}`), identifier quoting and
//! string literal quoting. Everything that embeds user-supplied text into a
//! statement goes through this module.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Errors raised while reading an array literal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralError {
    #[error("Array literal must be enclosed in braces: {0}")]
    MissingBraces(String),

    #[error("Unterminated quoted element in array literal: {0}")]
    UnterminatedQuote(String),

    #[error("Nested arrays are not supported: {0}")]
    Nested(String),

    #[error("Unexpected character '{1}' after quoted element in: {0}")]
    TrailingGarbage(String, char),
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Returns true if `name` is a plain SQL identifier (letters, digits, underscore).
/// Without a usable pattern nothing is accepted.
pub fn is_plain_identifier(name: &str) -> bool {
    name.len() <= 63 && identifier_pattern().map_or(false, |p| p.is_match(name))
}

/// Quote an identifier for embedding in a statement
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a qualified `schema.table` name
pub fn quote_qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Quote a string literal (standard_conforming_strings = on)
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render elements as an array literal in the server's text input format.
///
/// Every non-null element is double-quoted so that whitespace, commas and
/// braces survive; `None` renders as an unquoted `NULL`.
pub fn format_array_text(elements: &[Option<String>]) -> String {
    let mut out = String::with_capacity(2 + elements.len() * 8);
    out.push('{');
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match element {
            None => out.push_str("NULL"),
            Some(text) => {
                out.push('"');
                for c in text.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
        }
    }
    out.push('}');
    out
}

/// Parse a one-dimensional array literal as produced by the server's array
/// output function.
pub fn parse_array_text(input: &str) -> Result<Vec<Option<String>>, LiteralError> {
    let mut text = input.trim();

    // Arrays with non-default lower bounds are printed as `[0:2]={...}`
    if text.starts_with('[') {
        if let Some(eq) = text.find('=') {
            text = text[eq + 1..].trim_start();
        }
    }

    if !(text.starts_with('{') && text.ends_with('}')) || text.len() < 2 {
        return Err(LiteralError::MissingBraces(input.to_string()));
    }

    let body = &text[1..text.len() - 1];
    let mut elements = Vec::new();
    if body.trim().is_empty() {
        return Ok(elements);
    }

    let mut chars = body.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        match chars.peek() {
            Some('{') => return Err(LiteralError::Nested(input.to_string())),
            Some('"') => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(LiteralError::UnterminatedQuote(input.to_string()));
                }
                while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                    chars.next();
                }
                match chars.peek() {
                    None | Some(',') => {}
                    Some(&other) => {
                        return Err(LiteralError::TrailingGarbage(input.to_string(), other))
                    }
                }
                elements.push(Some(value));
            }
            _ => {
                let mut raw = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    chars.next();
                    if c == '\\' {
                        if let Some(escaped) = chars.next() {
                            raw.push(escaped);
                        }
                    } else {
                        raw.push(c);
                    }
                }
                let raw = raw.trim();
                if raw.eq_ignore_ascii_case("NULL") {
                    elements.push(None);
                } else {
                    elements.push(Some(raw.to_string()));
                }
            }
        }

        // element parsers stop at ',' or end of input
        if chars.next() != Some(',') {
            break;
        }
    }

    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_qualified("public", "orders"), "\"public\".\"orders\"");
    }

    #[test]
    fn test_quote_literal_doubles_single_quotes() {
        assert_eq!(quote_literal("16MB"), "'16MB'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("work_mem"));
        assert!(is_plain_identifier("_sp1"));
        assert!(!is_plain_identifier("1abc"));
        assert!(!is_plain_identifier("work_mem; DROP"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_identifier_pattern_compiles() {
        assert!(identifier_pattern().is_some());
    }

    #[test]
    fn test_format_array_text_quotes_every_element() {
        let text = format_array_text(&[
            Some("a".into()),
            None,
            Some("b \"c\"".into()),
            Some("d\\e".into()),
        ]);
        assert_eq!(text, r#"{"a",NULL,"b \"c\"","d\\e"}"#);
    }

    #[test]
    fn test_parse_server_output() {
        let parsed = parse_array_text(r#"{1,2,NULL,"hello world","x,y"}"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                Some("1".to_string()),
                Some("2".to_string()),
                None,
                Some("hello world".to_string()),
                Some("x,y".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_reads_back_formatted_text() {
        let elements = vec![Some("quote\"inside".to_string()), None, Some("back\\slash".to_string())];
        let parsed = parse_array_text(&format_array_text(&elements)).unwrap();
        assert_eq!(parsed, elements);
    }

    #[test]
    fn test_parse_empty_and_bounds_prefix() {
        assert!(parse_array_text("{}").unwrap().is_empty());
        assert_eq!(
            parse_array_text("[0:1]={7,8}").unwrap(),
            vec![Some("7".to_string()), Some("8".to_string())]
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_array_text("1,2"), Err(LiteralError::MissingBraces(_))));
        assert!(matches!(parse_array_text("{\"abc}"), Err(LiteralError::UnterminatedQuote(_))));
        assert!(matches!(parse_array_text("{{1},{2}}"), Err(LiteralError::Nested(_))));
        assert!(matches!(
            parse_array_text("{\"a\"b}"),
            Err(LiteralError::TrailingGarbage(_, 'b'))
        ));
    }
}
