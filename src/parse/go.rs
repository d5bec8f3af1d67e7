//! Transform for golangci-lint JSON output

use super::Payload;
use crate::model::RawDiagnostic;
use crate::severity::Severity;
use serde_json::Value;

/// Golangci-lint aggregates many linters; the message is prefixed with the
/// originating linter's name so findings stay attributable after merging.
pub fn golangci(payload: &Payload, tool: &str) -> Vec<RawDiagnostic> {
    let Payload::Json(value) = payload else {
        return Vec::new();
    };
    let issues = value
        .get("Issues")
        .or_else(|| value.get("issues"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    issues
        .iter()
        .map(|item| {
            let pos = item.get("Pos").cloned().unwrap_or(Value::Null);
            let file = pos
                .get("Filename")
                .and_then(Value::as_str)
                .or_else(|| item.get("file").and_then(Value::as_str))
                .map(str::to_string);
            let line = pos
                .get("Line")
                .and_then(Value::as_u64)
                .or_else(|| item.get("line").and_then(Value::as_u64))
                .map(|n| n.max(1) as u32)
                .unwrap_or(1);
            let column = pos
                .get("Column")
                .and_then(Value::as_u64)
                .or_else(|| item.get("column").and_then(Value::as_u64))
                .map(|n| n.max(1) as u32)
                .unwrap_or(1);
            let linter = item
                .get("FromLinter")
                .and_then(Value::as_str)
                .or_else(|| item.get("source").and_then(Value::as_str))
                .unwrap_or("");
            let text = item
                .get("Text")
                .and_then(Value::as_str)
                .or_else(|| item.get("message").and_then(Value::as_str))
                .unwrap_or("");
            let sev_str = item
                .get("Severity")
                .and_then(Value::as_str)
                .or_else(|| item.get("severity").and_then(Value::as_str))
                .unwrap_or("warning");
            RawDiagnostic {
                file,
                line: Some(line),
                column: Some(column),
                severity: Severity::coerce(sev_str, Severity::Warning),
                message: format!("{} {}", linter, text).trim().to_string(),
                code: if linter.is_empty() {
                    None
                } else {
                    Some(linter.to_string())
                },
                tool: Some(tool.to_string()),
                function: None,
            }
        })
        .collect()
}
