//! JSON output for the CLI
//!
//! - Output: single JSON object via stdout
//! - Logs go to stdout/stderr as separate JSON lines
//! - UTF-8 only

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

fn envelope_ok(data: Value) -> Value {
    serde_json::json!({
        "status": "ok",
        "data": data
    })
}

fn envelope_error(code: &str, message: &str) -> Value {
    serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    })
}

fn write_line(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    write_line(&envelope_ok(data))
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_line(&envelope_error(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelopes() {
        let ok = envelope_ok(serde_json::json!({"trials": 3}));
        assert_eq!(ok["status"], "ok");
        assert_eq!(ok["data"]["trials"], 3);

        let err = envelope_error("STATBENCH_CLI_CONFIG_ERROR", "missing query");
        assert_eq!(err["status"], "error");
        assert_eq!(err["code"], "STATBENCH_CLI_CONFIG_ERROR");
    }
}
