//! Severity model and override rules
//!
//! Every tool reports urgency differently: pylint has message types, eslint
//! has numeric levels, ruff reports nothing at all. `Severity` is the common
//! scale and `SeverityRules` corrects each tool's reported level through
//! per-tool regex overrides, so docstring nits never outrank type errors.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Diagnostic urgency, ordered `error > warning > notice > note`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Notice,
    Note,
}

impl Severity {
    /// Numeric rank for ordering and tie-breaks.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Error => 3,
            Severity::Warning => 2,
            Severity::Notice => 1,
            Severity::Note => 0,
        }
    }

    /// Parse a tool-reported level name, tolerating common synonyms.
    pub fn parse(s: &str) -> Option<Severity> {
        match s.trim().to_lowercase().as_str() {
            "error" | "fatal" => Some(Severity::Error),
            "warning" | "warn" => Some(Severity::Warning),
            "notice" | "information" | "info" => Some(Severity::Notice),
            "note" | "hint" => Some(Severity::Note),
            _ => None,
        }
    }

    /// Like [`Severity::parse`], but falls back instead of failing.
    pub fn coerce(s: &str, default: Severity) -> Severity {
        Severity::parse(s).unwrap_or(default)
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Note => "note",
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Severity guess from a lint code's leading letter, for tools whose output
/// carries codes but no level field (flake8 conventions: `E`/`F` hard
/// errors, `W` warnings).
pub fn severity_from_code(code: &str, default: Severity) -> Severity {
    match code.chars().next() {
        Some('E') | Some('F') => Severity::Error,
        Some('W') => Severity::Warning,
        _ => default,
    }
}

/// Per-tool severity override table. Explicit state, shared by reference;
/// no process-wide registry.
#[derive(Debug, Default)]
pub struct SeverityRules {
    rules: HashMap<String, Vec<(Regex, Severity)>>,
}

impl SeverityRules {
    /// Rule set with the built-in demotions: documentation and convention
    /// codes drop to notice so they never drown out real findings.
    pub fn new() -> Self {
        let mut rules = SeverityRules::empty();
        for (tool, pattern, severity) in [
            ("ruff", r"^(D|N)\d{3,4}", Severity::Notice),
            ("pylint", r"^C\d{4}", Severity::Notice),
            ("pylint", r"^R\d{4}", Severity::Notice),
        ] {
            rules.push(tool, Regex::new(pattern).unwrap(), severity);
        }
        rules
    }

    pub fn empty() -> Self {
        SeverityRules::default()
    }

    fn push(&mut self, tool: &str, pattern: Regex, severity: Severity) {
        self.rules
            .entry(tool.to_lowercase())
            .or_default()
            .push((pattern, severity));
    }

    /// First matching override for `tool` against the code (or, for codeless
    /// diagnostics, the message), else the reported level unchanged.
    pub fn classify(&self, tool: &str, code_or_msg: &str, reported: Severity) -> Severity {
        let Some(overrides) = self.rules.get(&tool.to_lowercase()) else {
            return reported;
        };
        for (pattern, severity) in overrides {
            if pattern.is_match(code_or_msg) {
                return *severity;
            }
        }
        reported
    }

    /// Register a user rule of the form `TOOL:REGEX=LEVEL`. The regex may
    /// itself contain `=`, so the level is split off the right end.
    pub fn add_rule(&mut self, spec: &str) -> Result<()> {
        let (tool, rest) = spec
            .split_once(':')
            .ok_or_else(|| anyhow!("expected TOOL:REGEX=LEVEL, got '{}'", spec))?;
        let (pattern, level) = rest
            .rsplit_once('=')
            .ok_or_else(|| anyhow!("missing '=LEVEL' in '{}'", spec))?;
        let tool = tool.trim();
        if tool.is_empty() {
            return Err(anyhow!("empty tool name in '{}'", spec));
        }
        let severity = Severity::parse(level)
            .ok_or_else(|| anyhow!("unknown severity level '{}'", level.trim()))?;
        let regex = Regex::new(pattern)
            .with_context(|| format!("invalid pattern '{}'", pattern))?;
        self.push(tool, regex, severity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_by_rank() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Notice);
        assert!(Severity::Notice > Severity::Note);
    }

    #[test]
    fn test_parse_synonyms() {
        assert_eq!(Severity::parse("Fatal"), Some(Severity::Error));
        assert_eq!(Severity::parse("warn"), Some(Severity::Warning));
        assert_eq!(Severity::parse("information"), Some(Severity::Notice));
        assert_eq!(Severity::parse("hint"), Some(Severity::Note));
        assert_eq!(Severity::parse("mystery"), None);
        assert_eq!(Severity::coerce("mystery", Severity::Warning), Severity::Warning);
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"error\"");
        let back: Severity = serde_json::from_str("\"notice\"").unwrap();
        assert_eq!(back, Severity::Notice);
    }

    #[test]
    fn test_severity_from_code() {
        assert_eq!(severity_from_code("E501", Severity::Notice), Severity::Error);
        assert_eq!(severity_from_code("F821", Severity::Notice), Severity::Error);
        assert_eq!(severity_from_code("W291", Severity::Notice), Severity::Warning);
        assert_eq!(severity_from_code("C901", Severity::Notice), Severity::Notice);
    }

    #[test]
    fn test_builtin_demotions() {
        let rules = SeverityRules::new();
        assert_eq!(rules.classify("ruff", "D100", Severity::Warning), Severity::Notice);
        assert_eq!(rules.classify("ruff", "N801", Severity::Warning), Severity::Notice);
        assert_eq!(rules.classify("pylint", "C0114", Severity::Warning), Severity::Notice);
        assert_eq!(rules.classify("pylint", "R0915", Severity::Warning), Severity::Notice);
        // Codes outside the tables keep the reported level
        assert_eq!(rules.classify("ruff", "F821", Severity::Warning), Severity::Warning);
        assert_eq!(rules.classify("mypy", "anything", Severity::Error), Severity::Error);
    }

    #[test]
    fn test_custom_rule_overrides() {
        let mut rules = SeverityRules::new();
        rules.add_rule("ruff:^E9=error").unwrap();
        assert_eq!(rules.classify("ruff", "E902", Severity::Warning), Severity::Error);
        // Built-ins still apply first where they matched before
        assert_eq!(rules.classify("ruff", "D100", Severity::Warning), Severity::Notice);
    }

    #[test]
    fn test_add_rule_errors() {
        let mut rules = SeverityRules::empty();
        assert!(rules.add_rule("no-colon-here").is_err());
        assert!(rules.add_rule("ruff:^E9").is_err());
        assert!(rules.add_rule("ruff:^E9=loud").is_err());
        assert!(rules.add_rule("ruff:(=error").is_err());
        assert!(rules.add_rule(":^E9=error").is_err());
    }
}
