//! Transforms for the JavaScript/TypeScript toolchain: eslint, tsc

use super::{ensure_list, pos_field, str_field, Payload};
use crate::model::RawDiagnostic;
use crate::severity::Severity;
use regex::Regex;
use serde_json::Value;

/// Eslint JSON output: one entry per file, each with a `messages` array.
/// Numeric severity: 2 = error, 1 = warning, 0 = off/notice.
pub fn eslint(payload: &Payload) -> Vec<RawDiagnostic> {
    let mut diags = Vec::new();
    for entry in ensure_list(payload) {
        let file = str_field(&entry, "filePath");
        let Some(messages) = entry.get("messages").and_then(Value::as_array) else {
            continue;
        };
        for m in messages {
            let severity = match m.get("severity").and_then(Value::as_u64).unwrap_or(2) {
                0 => Severity::Notice,
                1 => Severity::Warning,
                _ => Severity::Error,
            };
            diags.push(RawDiagnostic {
                file: file.clone(),
                line: Some(pos_field(m, "line")),
                column: Some(pos_field(m, "column")),
                severity,
                message: str_field(m, "message").unwrap_or_default(),
                code: str_field(m, "ruleId"),
                tool: Some("eslint".to_string()),
                function: None,
            });
        }
    }
    diags
}

/// Tsc text output: `file(line,col): severity CODE: message`.
pub fn tsc(payload: &Payload, tool: &str) -> Vec<RawDiagnostic> {
    let pattern = Regex::new(
        r"^(?P<file>[^:(\n]+)\((?P<line>\d+),(?P<col>\d+)\):\s*(?P<sev>error|warning)\s*(?P<code>[A-Za-z]+\d+)?:?\s*(?P<msg>.+)$",
    )
    .unwrap();
    let mut diags = Vec::new();
    for raw_line in payload.as_text().lines() {
        let Some(caps) = pattern.captures(raw_line.trim()) else {
            continue;
        };
        let code = caps.name("code").map(|m| m.as_str().to_string());
        let msg = caps.name("msg").map(|m| m.as_str()).unwrap_or("");
        // tsc messages read better with the TS code kept in front
        let message = match &code {
            Some(c) => format!("{} {}", c, msg),
            None => msg.to_string(),
        };
        diags.push(RawDiagnostic {
            file: caps.name("file").map(|m| m.as_str().to_string()),
            line: caps.name("line").and_then(|m| m.as_str().parse().ok()).or(Some(1)),
            column: caps.name("col").and_then(|m| m.as_str().parse().ok()).or(Some(1)),
            severity: Severity::coerce(&caps["sev"], Severity::Error),
            message,
            code,
            tool: Some(tool.to_string()),
            function: None,
        });
    }
    diags
}
