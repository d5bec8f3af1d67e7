//! Transforms for the Python toolchain: ruff, pylint, mypy, pyright, bandit

use super::{ensure_list, pos_field, str_field, Payload};
use crate::model::RawDiagnostic;
use crate::severity::Severity;
use serde_json::Value;

/// Ruff JSON output. Ruff reports no severity field; normalization starts
/// everything at warning and lets the severity rules adjust.
pub fn ruff(payload: &Payload) -> Vec<RawDiagnostic> {
    ensure_list(payload)
        .iter()
        .map(|item| RawDiagnostic {
            file: str_field(item, "filename"),
            line: Some(pos_field(item, "row")),
            column: Some(pos_field(item, "col")),
            severity: Severity::Warning,
            message: str_field(item, "message").unwrap_or_default(),
            code: str_field(item, "code"),
            tool: Some("ruff".to_string()),
            function: None,
        })
        .collect()
}

fn pylint_type_to_severity(pylint_type: &str) -> Severity {
    match pylint_type.to_lowercase().as_str() {
        "error" | "fatal" => Severity::Error,
        "refactor" | "convention" | "info" => Severity::Notice,
        _ => Severity::Warning,
    }
}

/// Pylint JSON output. The `obj` field names the enclosing symbol when
/// pylint knows it.
pub fn pylint(payload: &Payload, tool: &str) -> Vec<RawDiagnostic> {
    ensure_list(payload)
        .iter()
        .map(|item| RawDiagnostic {
            file: str_field(item, "path").or_else(|| str_field(item, "filename")),
            line: Some(pos_field(item, "line")),
            column: Some(pos_field(item, "column")),
            severity: pylint_type_to_severity(
                item.get("type").and_then(Value::as_str).unwrap_or(""),
            ),
            message: str_field(item, "message").unwrap_or_default(),
            code: str_field(item, "message-id").or_else(|| str_field(item, "symbol")),
            tool: Some(tool.to_string()),
            function: str_field(item, "obj"),
        })
        .collect()
}

/// Mypy JSON (or JSON-Lines) output.
pub fn mypy(payload: &Payload, tool: &str) -> Vec<RawDiagnostic> {
    ensure_list(payload)
        .iter()
        .map(|item| {
            let sev_str = item.get("severity").and_then(Value::as_str).unwrap_or("error");
            RawDiagnostic {
                file: str_field(item, "path").or_else(|| str_field(item, "file")),
                line: Some(pos_field(item, "line")),
                column: Some(pos_field(item, "column")),
                severity: Severity::coerce(sev_str, Severity::Notice),
                message: str_field(item, "message").unwrap_or_default(),
                code: str_field(item, "code"),
                tool: Some(tool.to_string()),
                function: None,
            }
        })
        .collect()
}

/// Pyright JSON output. Positions are 0-based in the payload.
pub fn pyright(payload: &Payload, tool: &str) -> Vec<RawDiagnostic> {
    let Payload::Json(value) = payload else {
        return Vec::new();
    };
    let Some(items) = value.get("generalDiagnostics").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let start = item
                .get("range")
                .and_then(|r| r.get("start"))
                .cloned()
                .unwrap_or(Value::Null);
            let sev_str = item.get("severity").and_then(Value::as_str).unwrap_or("error");
            RawDiagnostic {
                file: str_field(item, "file"),
                line: Some(start.get("line").and_then(Value::as_u64).unwrap_or(0) as u32 + 1),
                column: Some(
                    start.get("character").and_then(Value::as_u64).unwrap_or(0) as u32 + 1,
                ),
                severity: Severity::coerce(sev_str, Severity::Error),
                message: str_field(item, "message").unwrap_or_default(),
                code: str_field(item, "rule"),
                tool: Some(tool.to_string()),
                function: None,
            }
        })
        .collect()
}

/// Bandit JSON output. Severity buckets map onto the canonical levels.
pub fn bandit(payload: &Payload, tool: &str) -> Vec<RawDiagnostic> {
    let Payload::Json(value) = payload else {
        return Vec::new();
    };
    let Some(results) = value.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    results
        .iter()
        .map(|item| {
            let severity = match item
                .get("issue_severity")
                .and_then(Value::as_str)
                .unwrap_or("MEDIUM")
                .to_lowercase()
                .as_str()
            {
                "high" | "critical" => Severity::Error,
                "medium" => Severity::Warning,
                _ => Severity::Notice,
            };
            RawDiagnostic {
                file: str_field(item, "filename"),
                line: Some(pos_field(item, "line_number")),
                column: Some(1),
                severity,
                message: str_field(item, "issue_text").unwrap_or_default(),
                code: str_field(item, "test_id"),
                tool: Some(tool.to_string()),
                function: None,
            }
        })
        .collect()
}
