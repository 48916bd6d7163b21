//! Structured JSON logger
//!
//! - One log line = one event
//! - `event` first, then `severity`, then fields in alphabetical order
//! - TRACE/INFO/WARN go to stdout, ERROR/FATAL to stderr
//! - Synchronous, no buffering
//!
//! The minimum severity is process-wide and defaults to INFO. It can be
//! lowered with `STATBENCH_LOG=trace` or [`Logger::set_min_severity`].

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Once;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Per-statement detail (fallback attempts, SQL probes)
    Trace = 0,
    /// Milestones
    Info = 1,
    /// Recovered failures (dropped estimates, encoding failures, degrades)
    Warn = 2,
    /// Experiment-level failures
    Error = 3,
    /// Process cannot continue
    Fatal = 4,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// Parse a severity name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" => Some(Severity::Trace),
            "info" => Some(Severity::Info),
            "warn" | "warning" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            "fatal" => Some(Severity::Fatal),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Severity::Trace,
            1 => Severity::Info,
            2 => Severity::Warn,
            3 => Severity::Error,
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);
static ENV_INIT: Once = Once::new();

/// A structured logger that outputs JSON lines
pub struct Logger;

impl Logger {
    /// Set the process-wide minimum severity
    pub fn set_min_severity(severity: Severity) {
        ENV_INIT.call_once(|| {});
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    /// Current minimum severity
    pub fn min_severity() -> Severity {
        ENV_INIT.call_once(|| {
            if let Some(level) = std::env::var("STATBENCH_LOG")
                .ok()
                .and_then(|v| Severity::parse(&v))
            {
                MIN_SEVERITY.store(level as u8, Ordering::Relaxed);
            }
        });
        Severity::from_u8(MIN_SEVERITY.load(Ordering::Relaxed))
    }

    /// Returns true if events at `severity` would be written
    pub fn enabled(severity: Severity) -> bool {
        severity >= Self::min_severity()
    }

    /// Log an event with the given severity and fields
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if !Self::enabled(severity) {
            return;
        }
        if severity >= Severity::Error {
            Self::log_to_writer(severity, event, fields, &mut io::stderr());
        } else {
            Self::log_to_writer(severity, event, fields, &mut io::stdout());
        }
    }

    fn log_to_writer<W: Write>(
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
        writer: &mut W,
    ) {
        let line = Self::render(severity, event, fields);
        // One write per line so concurrent experiments never interleave mid-line
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }

    /// Render one log line (including the trailing newline)
    pub fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut output = String::with_capacity(256);

        output.push_str("{\"event\":\"");
        Self::escape_json_string(&mut output, event);
        output.push_str("\",\"severity\":\"");
        output.push_str(severity.as_str());
        output.push('"');

        let mut sorted_fields: Vec<_> = fields.iter().collect();
        sorted_fields.sort_by_key(|(k, _)| *k);

        for (key, value) in sorted_fields {
            output.push_str(",\"");
            Self::escape_json_string(&mut output, key);
            output.push_str("\":\"");
            Self::escape_json_string(&mut output, value);
            output.push('"');
        }

        output.push_str("}\n");
        output
    }

    fn escape_json_string(output: &mut String, s: &str) {
        for c in s.chars() {
            match c {
                '"' => output.push_str("\\\""),
                '\\' => output.push_str("\\\\"),
                '\n' => output.push_str("\\n"),
                '\r' => output.push_str("\\r"),
                '\t' => output.push_str("\\t"),
                c if c.is_control() => {
                    output.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => output.push(c),
            }
        }
    }

    /// Log at TRACE level
    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    /// Log at INFO level
    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    /// Log at WARN level
    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    /// Log at ERROR level
    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    /// Log at FATAL level
    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, event, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("TRACE"), Some(Severity::Trace));
        assert_eq!(Severity::parse("debug"), Some(Severity::Trace));
        assert_eq!(Severity::parse(" warning "), Some(Severity::Warn));
        assert_eq!(Severity::parse("loud"), None);
    }

    #[test]
    fn test_render_is_valid_json() {
        let output = Logger::render(Severity::Info, "TRIAL_COMPLETE", &[("trial", "3")]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["event"], "TRIAL_COMPLETE");
        assert_eq!(parsed["severity"], "INFO");
        assert_eq!(parsed["trial"], "3");
    }

    #[test]
    fn test_render_sorts_fields() {
        let a = Logger::render(Severity::Warn, "E", &[("zebra", "1"), ("apple", "2")]);
        let b = Logger::render(Severity::Warn, "E", &[("apple", "2"), ("zebra", "1")]);
        assert_eq!(a, b);
        assert!(a.find("apple").unwrap() < a.find("zebra").unwrap());
    }

    #[test]
    fn test_render_escapes_and_is_one_line() {
        let output = Logger::render(
            Severity::Error,
            "E",
            &[("message", "syntax error at \"FROM\"\nLINE 1")],
        );
        assert_eq!(output.matches('\n').count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["message"], "syntax error at \"FROM\"\nLINE 1");
    }

    #[test]
    fn test_event_precedes_severity() {
        let output = Logger::render(Severity::Info, "MY_EVENT", &[]);
        assert!(output.find("\"event\"").unwrap() < output.find("\"severity\"").unwrap());
    }
}
