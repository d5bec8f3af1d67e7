//! Canonical diagnostic records
//!
//! Every tool's output funnels into the same shapes: a transient
//! `RawDiagnostic` straight out of a parser, the normalized `Diagnostic` that
//! reports and the cache persist, a `ToolOutcome` per executed action, and a
//! `RunResult` aggregating one whole invocation.

use crate::severity::{Severity, SeverityRules};
use crate::util::relative_to_root;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Tool-native diagnostic before normalization. Produced only by parsers and
/// never persisted.
#[derive(Debug, Clone)]
pub struct RawDiagnostic {
    pub file: Option<String>,
    /// 1-based line; parsers default missing values to 1, never 0.
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
    pub code: Option<String>,
    /// Owning tool name when the payload carries one.
    pub tool: Option<String>,
    /// Enclosing function/class when the tool reports it. Parsers that cannot
    /// recover one leave this unset rather than guess.
    pub function: Option<String>,
}

impl RawDiagnostic {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        RawDiagnostic {
            file: None,
            line: None,
            column: None,
            severity,
            message: message.into(),
            code: None,
            tool: None,
            function: None,
        }
    }
}

/// Canonical, report-facing diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Project-relative path when resolvable, else as the tool reported it.
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
    /// Canonical name of the tool that produced this finding.
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Coarse classification tag, lazily assigned by the dedup engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Annotations added by later enrichment passes; round-tripped untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Tools whose conventions put the code in front of the message text.
const CODE_PREFIX_TOOLS: &[&str] = &["pylint", "ruff"];

/// Normalize one raw diagnostic: resolve the path relative to `root`, apply
/// severity override rules, and strip/reinsert the code prefix so the message
/// never starts with a duplicated code token.
pub fn normalize(raw: RawDiagnostic, root: &Path, rules: &SeverityRules) -> Diagnostic {
    let tool = raw.tool.unwrap_or_else(|| "unknown".to_string());
    let code = raw.code.filter(|c| !c.is_empty());

    let mut message = raw.message.trim().to_string();
    if let Some(code) = &code {
        message = strip_code_prefix(&message, code);
        if message.is_empty() {
            message = code.clone();
        } else if CODE_PREFIX_TOOLS.contains(&tool.as_str()) {
            message = format!("{} {}", code, message);
        }
    }

    // Ruff's JSON carries no severity field; everything starts as a warning
    // and the rule table promotes or demotes from there.
    let reported = if tool == "ruff" {
        Severity::Warning
    } else {
        raw.severity
    };
    let key = code.as_deref().unwrap_or(&message);
    let severity = rules.classify(&tool, key, reported);

    let file = raw
        .file
        .filter(|f| !f.is_empty())
        .map(|f| relative_to_root(&f, root));

    Diagnostic {
        file,
        line: raw.line,
        column: raw.column,
        severity,
        message,
        tool,
        code,
        group: None,
        function: raw.function,
        hints: Vec::new(),
        tags: Vec::new(),
    }
}

/// Normalize a batch in input order.
pub fn normalize_all(
    raws: Vec<RawDiagnostic>,
    root: &Path,
    rules: &SeverityRules,
) -> Vec<Diagnostic> {
    raws.into_iter().map(|r| normalize(r, root, rules)).collect()
}

/// Remove a leading duplicate of `code` (with optional `:` and whitespace)
/// from `message`. A message that is nothing but the code strips to empty.
fn strip_code_prefix(message: &str, code: &str) -> String {
    let Some(rest) = message.strip_prefix(code) else {
        return message.to_string();
    };
    rest.trim_start_matches(':').trim_start().to_string()
}

/// One tool action's execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub action: String,
    pub returncode: i32,
    /// stdout/stderr after the action's line filters ran.
    pub stdout: String,
    pub stderr: String,
    pub raw_stdout: String,
    pub raw_stderr: String,
    pub diagnostics: Vec<Diagnostic>,
    /// True when this outcome was served from the result cache.
    #[serde(default)]
    pub cached: bool,
    /// Crash or timeout reason when the process never produced a usable exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crashed: Option<String>,
    /// Nonzero exit does not fail the run for fix-style actions.
    #[serde(default)]
    pub ignore_exit: bool,
}

impl ToolOutcome {
    pub fn ok(&self) -> bool {
        self.crashed.is_none() && (self.returncode == 0 || self.ignore_exit)
    }
}

/// Aggregate over one invocation. The dedup engine receives this by mutable
/// reference and rewrites `outcomes[*].diagnostics` only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub root: PathBuf,
    pub files: Vec<PathBuf>,
    pub outcomes: Vec<ToolOutcome>,
    #[serde(default)]
    pub tool_versions: HashMap<String, String>,
    /// Cross-cutting analysis metadata attached by enrichment passes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub analysis: HashMap<String, serde_json::Value>,
}

impl RunResult {
    pub fn new(root: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        RunResult {
            root: root.into(),
            files,
            outcomes: Vec::new(),
            tool_versions: HashMap::new(),
            analysis: HashMap::new(),
        }
    }

    /// A run fails when any action crashed or exited nonzero. Degraded cache
    /// or parse paths do not fail a run on their own.
    pub fn failed(&self) -> bool {
        self.outcomes.iter().any(|o| !o.ok())
    }

    /// All surviving diagnostics in outcome order.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.outcomes.iter().flat_map(|o| o.diagnostics.iter())
    }
}
