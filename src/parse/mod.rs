//! Per-tool output parsing
//!
//! Raw tool output arrives as JSON, JSON-Lines, or plain text. `Payload`
//! resolves the shape once at entry; each tool then has a single transform
//! from its native shape to `RawDiagnostic`s. Transforms never fail: on
//! malformed input they produce fewer (or zero) diagnostics, never an error.

pub mod go;
pub mod javascript;
pub mod python;
pub mod rust_tools;
pub mod symbols;

use crate::model::RawDiagnostic;
use crate::severity::{severity_from_code, Severity};
use regex::Regex;
use serde_json::Value;
use std::path::Path;

/// Decoded tool output, resolved once before per-tool dispatch.
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    /// Decode raw output. Whole-buffer JSON first, then a JSON-Lines
    /// fallback (each non-blank line decoded independently, failures
    /// skipped), else plain text.
    pub fn decode(raw: &str) -> Payload {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Payload::Text(String::new());
        }
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Payload::Json(value);
        }
        let mut items = Vec::new();
        for line in trimmed.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(line) {
                items.push(value);
            }
        }
        if items.is_empty() {
            Payload::Text(raw.to_string())
        } else {
            Payload::Json(Value::Array(items))
        }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Payload::Text(s) => s,
            Payload::Json(_) => "",
        }
    }
}

/// Treat a JSON payload as a list: arrays as-is, a lone object as a
/// single-element list, anything else as empty.
pub(crate) fn ensure_list(payload: &Payload) -> Vec<Value> {
    match payload {
        Payload::Json(Value::Array(items)) => items.clone(),
        Payload::Json(obj @ Value::Object(_)) => vec![obj.clone()],
        _ => Vec::new(),
    }
}

pub(crate) fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read a 1-based position field, defaulting to 1 to keep 1-based
/// consistency (never 0).
pub(crate) fn pos_field(item: &Value, key: &str) -> u32 {
    item.get(key)
        .and_then(Value::as_u64)
        .map(|n| n.max(1) as u32)
        .unwrap_or(1)
}

/// Per-tool dispatcher. The fallback `file:line:col` pattern is compiled
/// once here, not on every action.
pub struct Parser {
    generic: Regex,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            generic: Regex::new(
                r"^(?P<file>[^:\n]+):(?P<line>\d+):(?P<col>\d+):?\s*(?P<msg>.+)$",
            )
            .unwrap(),
        }
    }

    /// Parse a tool's decoded output into raw diagnostics and attach
    /// enclosing symbol names where recoverable.
    pub fn parse(&self, tool: &str, payload: &Payload, root: &Path) -> Vec<RawDiagnostic> {
        let mut raws = match tool {
            "ruff" => python::ruff(payload),
            "pylint" => python::pylint(payload, tool),
            "mypy" => python::mypy(payload, tool),
            "pyright" => python::pyright(payload, tool),
            "bandit" => python::bandit(payload, tool),
            "eslint" => javascript::eslint(payload),
            "tsc" => javascript::tsc(payload, tool),
            "golangci-lint" => go::golangci(payload, tool),
            "cargo" | "clippy" | "cargo-clippy" => rust_tools::cargo_json(payload, tool),
            "rust" | "rustc" | "cargo-fmt" | "cargo-test" => rust_tools::rust_text(payload),
            _ => regex_text(payload, tool, &self.generic),
        };
        symbols::attach_functions(&mut raws, root);
        raws
    }
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

/// Transform line-oriented text via a caller-supplied pattern with
/// `file`/`line`/`col` and optional `sev`/`code`/`msg` named captures.
pub fn regex_text(payload: &Payload, tool: &str, pattern: &Regex) -> Vec<RawDiagnostic> {
    let mut diags = Vec::new();
    for raw_line in payload.as_text().lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(caps) = pattern.captures(line) else {
            continue;
        };
        let severity = match (caps.name("sev"), caps.name("code")) {
            (Some(sev), _) => Severity::coerce(sev.as_str(), Severity::Error),
            (None, Some(code)) => severity_from_code(code.as_str(), Severity::Error),
            (None, None) => Severity::Error,
        };
        diags.push(RawDiagnostic {
            file: caps.name("file").map(|m| m.as_str().to_string()),
            line: caps.name("line").and_then(|m| m.as_str().parse().ok()).or(Some(1)),
            column: caps.name("col").and_then(|m| m.as_str().parse().ok()).or(Some(1)),
            severity,
            message: caps
                .name("msg")
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| line.to_string()),
            code: caps.name("code").map(|m| m.as_str().to_string()),
            tool: Some(tool.to_string()),
            function: None,
        });
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_whole_json() {
        let payload = Payload::decode(r#"[{"code": "F401"}]"#);
        assert!(matches!(payload, Payload::Json(Value::Array(_))));
    }

    #[test]
    fn test_decode_jsonl_fallback_skips_bad_lines() {
        let payload = Payload::decode("{\"a\": 1}\nnot json\n{\"b\": 2}\n");
        let Payload::Json(Value::Array(items)) = payload else {
            panic!("expected array payload");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_decode_plain_text() {
        let payload = Payload::decode("src/a.py:3:1: something broke");
        assert!(matches!(payload, Payload::Text(_)));
    }

    #[test]
    fn test_generic_fallback_parses_colon_lines() {
        let parser = Parser::new();
        let payload = Payload::Text("src/a.py:3:7: something broke\nnoise\n".to_string());
        let diags = parser.parse("sometool", &payload, Path::new("/repo"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file.as_deref(), Some("src/a.py"));
        assert_eq!(diags[0].line, Some(3));
        assert_eq!(diags[0].column, Some(7));
        assert_eq!(diags[0].message, "something broke");
        assert_eq!(diags[0].tool.as_deref(), Some("sometool"));
    }

    #[test]
    fn test_generic_fallback_ignores_json_payload() {
        let parser = Parser::new();
        let payload = Payload::Json(Value::Array(vec![]));
        assert!(parser.parse("sometool", &payload, Path::new("/repo")).is_empty());
    }

    #[test]
    fn test_regex_text_severity_from_code_capture() {
        // flake8-style output: a code but no level field
        let pattern = Regex::new(
            r"^(?P<file>[^:\n]+):(?P<line>\d+):(?P<col>\d+):\s*(?P<code>[A-Z]+\d+)\s+(?P<msg>.+)$",
        )
        .unwrap();
        let payload = Payload::Text("a.py:1:1: W291 trailing whitespace\n".to_string());
        let diags = regex_text(&payload, "flake8", &pattern);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].code.as_deref(), Some("W291"));
    }

    #[test]
    fn test_unknown_tool_falls_back_to_generic() {
        let payload = Payload::decode("lib/z.py:10:2: bad thing");
        let diags = Parser::new().parse("sometool", &payload, Path::new("/repo"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "bad thing");
    }
}
