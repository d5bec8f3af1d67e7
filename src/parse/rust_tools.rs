//! Transforms for the Rust toolchain: cargo/clippy JSON and rustc/rustfmt text

use super::{ensure_list, Payload};
use crate::model::RawDiagnostic;
use crate::severity::Severity;
use regex::Regex;
use serde_json::Value;

/// Cargo/clippy `--message-format=json` output (JSON-Lines of compiler
/// messages). Only messages with spans become diagnostics; the primary span
/// anchors the location.
pub fn cargo_json(payload: &Payload, tool: &str) -> Vec<RawDiagnostic> {
    let mut diags = Vec::new();
    for item in ensure_list(payload) {
        let Some(msg) = item.get("message").and_then(Value::as_object) else {
            continue;
        };
        let severity = match msg.get("level").and_then(Value::as_str).unwrap_or("warning") {
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            _ => Severity::Notice,
        };
        let code = msg
            .get("code")
            .and_then(Value::as_object)
            .and_then(|c| c.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(spans) = msg.get("spans").and_then(Value::as_array).filter(|s| !s.is_empty())
        else {
            continue;
        };
        let primary = spans
            .iter()
            .find(|sp| sp.get("is_primary").and_then(Value::as_bool).unwrap_or(false))
            .unwrap_or(&spans[0]);
        diags.push(RawDiagnostic {
            file: primary
                .get("file_name")
                .and_then(Value::as_str)
                .map(str::to_string),
            line: Some(
                primary
                    .get("line_start")
                    .and_then(Value::as_u64)
                    .map(|n| n.max(1) as u32)
                    .unwrap_or(1),
            ),
            column: Some(
                primary
                    .get("column_start")
                    .and_then(Value::as_u64)
                    .map(|n| n.max(1) as u32)
                    .unwrap_or(1),
            ),
            severity,
            message: msg
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            code,
            tool: Some(tool.to_string()),
            function: None,
        });
    }
    diags
}

struct RustTextPatterns {
    location: Regex,
    rustfmt_diff: Regex,
    panic_at: Regex,
}

impl RustTextPatterns {
    fn new() -> Self {
        RustTextPatterns {
            location: Regex::new(r"^\s*-->\s*(?P<file>[^:\n]+):(?P<line>\d+):(?P<col>\d+)\s*$")
                .unwrap(),
            rustfmt_diff: Regex::new(r"^Diff in (?P<file>[^:\n]+):(?P<line>\d+):(?P<col>\d+)")
                .unwrap(),
            panic_at: Regex::new(r"\b(?P<file>[^:\s]+):(?P<line>\d+):(?P<col>\d+)\b").unwrap(),
        }
    }
}

fn at(caps: &regex::Captures<'_>) -> (Option<String>, Option<u32>, Option<u32>) {
    (
        caps.name("file").map(|m| m.as_str().to_string()),
        caps.name("line").and_then(|m| m.as_str().parse().ok()),
        caps.name("col").and_then(|m| m.as_str().parse().ok()),
    )
}

/// Rustc/rustfmt/test text output. Warning/error headers are paired with the
/// `--> file:line:col` location that follows them; rustfmt diffs and test
/// panics are recognized directly.
pub fn rust_text(payload: &Payload) -> Vec<RawDiagnostic> {
    let patterns = RustTextPatterns::new();
    let mut diags = Vec::new();
    let mut pending: Option<(Severity, String)> = None;

    for raw_line in payload.as_text().lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = patterns.rustfmt_diff.captures(line) {
            let (file, line_no, col) = at(&caps);
            diags.push(RawDiagnostic {
                file,
                line: line_no,
                column: col,
                severity: Severity::Warning,
                message: "rustfmt wants changes".to_string(),
                code: None,
                tool: Some("cargo-fmt".to_string()),
                function: None,
            });
        } else if line.contains("panicked at") {
            if let Some(caps) = patterns.panic_at.captures(line) {
                let (file, line_no, col) = at(&caps);
                diags.push(RawDiagnostic {
                    file,
                    line: line_no,
                    column: col,
                    severity: Severity::Error,
                    message: line.to_string(),
                    code: Some("panic".to_string()),
                    tool: Some("rust".to_string()),
                    function: None,
                });
            }
        } else if let Some(rest) = line.strip_prefix("warning: ") {
            pending = Some((Severity::Warning, rest.to_string()));
        } else if let Some(rest) = line.strip_prefix("error: ") {
            pending = Some((Severity::Error, rest.to_string()));
        } else if let Some(caps) = patterns.location.captures(line) {
            if let Some((severity, message)) = pending.take() {
                let (file, line_no, col) = at(&caps);
                diags.push(RawDiagnostic {
                    file,
                    line: line_no,
                    column: col,
                    severity,
                    message,
                    code: None,
                    tool: Some("rust".to_string()),
                    function: None,
                });
            }
        }
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cargo_json_primary_span() {
        // One complete JSON object per line, the way cargo actually streams it
        let jsonl = concat!(
            r#"{"reason":"compiler-message","message":{"level":"warning","code":{"code":"unused_variables"},"message":"unused variable: `x`","spans":[{"file_name":"src/lib.rs","line_start":7,"column_start":9,"is_primary":true}]}}"#,
            "\n",
            r#"{"reason":"build-finished"}"#,
        );
        let payload = Payload::decode(jsonl);
        let diags = cargo_json(&payload, "clippy");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file.as_deref(), Some("src/lib.rs"));
        assert_eq!(diags[0].line, Some(7));
        assert_eq!(diags[0].code.as_deref(), Some("unused_variables"));
        assert_eq!(diags[0].severity, Severity::Warning);
    }

    #[test]
    fn test_cargo_json_skips_spanless_messages() {
        let payload = Payload::decode(
            r#"{"message":{"level":"warning","message":"crate-level note","spans":[]}}"#,
        );
        assert!(cargo_json(&payload, "clippy").is_empty());
    }

    #[test]
    fn test_rust_text_pairs_header_with_location() {
        let payload = Payload::Text(
            "error: mismatched types\n --> src/main.rs:12:5\nhelp: try this\n".to_string(),
        );
        let diags = rust_text(&payload);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].file.as_deref(), Some("src/main.rs"));
        assert_eq!(diags[0].line, Some(12));
        assert_eq!(diags[0].message, "mismatched types");
    }

    #[test]
    fn test_rust_text_rustfmt_diff() {
        let payload = Payload::Text("Diff in src/lib.rs:3:1\n".to_string());
        let diags = rust_text(&payload);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].tool.as_deref(), Some("cargo-fmt"));
        assert_eq!(diags[0].message, "rustfmt wants changes");
    }

    #[test]
    fn test_rust_text_test_panic() {
        let payload =
            Payload::Text("thread 'main' panicked at src/lib.rs:40:9:\n".to_string());
        let diags = rust_text(&payload);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code.as_deref(), Some("panic"));
        assert_eq!(diags[0].severity, Severity::Error);
    }
}
