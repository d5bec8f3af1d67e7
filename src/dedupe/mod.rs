//! Cross-tool deduplication and severity reconciliation
//!
//! Running several linters over the same tree produces clusters of findings
//! that describe one underlying problem: ruff's F821 and pylint's E0602 are
//! the same undefined name. Each diagnostic is assigned a coarse issue class
//! and a grouping key; within a key, a configurable tie-break policy picks
//! one survivor and the rest are dropped silently.
//!
//! Duplicate-code diagnostics (one finding enumerating many locations) are a
//! different kind of redundancy and are collapsed first, per tool, by
//! `duplicate_code`.

pub mod duplicate_code;

use crate::model::{Diagnostic, RunResult};
use crate::util::relative_to_root;
use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

/// Policy for choosing a survivor among grouped duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Earliest reported diagnostic survives.
    #[default]
    First,
    /// Highest severity survives; ties go to the earliest.
    Severity,
    /// An ordered tool preference list is consulted; unlisted tools rank
    /// last, and ties fall back to severity rank, then emission order.
    Prefer,
}

impl FromStr for TieBreak {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "first" => Ok(TieBreak::First),
            "severity" => Ok(TieBreak::Severity),
            "prefer" => Ok(TieBreak::Prefer),
            other => Err(anyhow!("unknown dedupe policy '{}'", other)),
        }
    }
}

/// Dedup engine configuration, supplied by the config layer.
#[derive(Debug, Clone)]
pub struct DedupeConfig {
    pub enabled: bool,
    pub tie_break: TieBreak,
    /// Tool names in descending preference, for `TieBreak::Prefer`.
    pub prefer: Vec<String>,
    /// Line distance within which unclassified near-identical messages merge.
    pub line_fuzz: u32,
    /// Only merge diagnostics that agree on the file (default).
    pub same_file_only: bool,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        DedupeConfig {
            enabled: false,
            tie_break: TieBreak::First,
            prefer: Vec::new(),
            line_fuzz: 2,
            same_file_only: true,
        }
    }
}

/// Issue classes recognized by the message/code pattern library, in match
/// priority order.
const GROUP_PATTERNS: &[(&str, &str)] = &[
    (
        "import",
        r"(?i)(unable to import|no module named|import[- ]error|could not be resolved|reportMissingImports|cannot find module|module not found|E0401|TS2307)",
    ),
    (
        "undefined",
        r#"(?i)(undefined name|name ["'`][^"'`]+["'`] is not defined|reportUndefinedVariable|cannot find name|is not defined|F821|E0602|no-undef|TS(2304|2552))"#,
    ),
    (
        "unused-import",
        r"(?i)(unused import|F401|W0611)",
    ),
    (
        "unused-variable",
        r"(?i)(unused variable|F841|W0612|no-unused-vars|TS6133)",
    ),
    (
        "type",
        r"(?i)(incompatible type|typed? mismatch|not assignable|reportGeneralTypeIssues|TS(2322|2345|2532|18047))",
    ),
    (
        "syntax",
        r"(?i)(syntaxerror|parse error|invalid syntax|unexpected token|TS1005|TS1002|TS1128)",
    ),
    (
        "attribute",
        r"(?i)(has no attribute|member .* does not exist|object has no attribute|reportOptionalMemberAccess)",
    ),
    (
        "style",
        r"(?i)(pep8|naming|convention|whitespace|line too long|trailing whitespace|N\d{3}|D\d{3}|E\d{3}|W\d{3}|C\d{4}|RUF\d{3}|prettier|format)",
    ),
    (
        "formatting",
        r"(?i)(formatted|reformatted|would reformat|isort|black|prettier|gofmt|rustfmt)",
    ),
    (
        "security",
        r"(?i)(bandit|B\d{3}|hardcoded password|injection|pickle|yaml\.load|subprocess\.|shell=)",
    ),
    (
        "deadcode",
        r"(?i)(vulture|unused code|unreachable code|dead code)",
    ),
    (
        "complexity",
        r"(?i)(too many branches|too complex|cyclomatic|C901|R(126|127|1702|1720))",
    ),
    (
        "performance",
        r"(?i)(perf|performance|inefficient|unnecessary list comprehension|unnecessary call)",
    ),
    (
        "test-failure",
        r"(?i)(assert.*failed|FAILED \[|panicked at|AssertionError|test result: FAILED|jest.*failed)",
    ),
];

/// Explicit tool+code lookups, consulted before the pattern library.
fn code_group(tool: &str, code: &str) -> Option<&'static str> {
    let c = code.to_uppercase();
    match tool {
        "ruff" => {
            if c.starts_with("F401") {
                Some("unused-import")
            } else if c.starts_with("F841") {
                Some("unused-variable")
            } else if c.starts_with("F821") {
                Some("undefined")
            } else if c.starts_with("PERF") {
                Some("performance")
            } else if c.starts_with("C90") {
                Some("complexity")
            } else if c.starts_with('S') {
                Some("security")
            } else if matches!(c.chars().next(), Some('D' | 'N' | 'E' | 'W')) {
                Some("style")
            } else {
                None
            }
        }
        "pylint" => {
            if c.starts_with("E0401") {
                Some("import")
            } else if c.starts_with("E0602") {
                Some("undefined")
            } else if c.starts_with("W0611") {
                Some("unused-import")
            } else if c.starts_with("W0612") {
                Some("unused-variable")
            } else if c.starts_with('R') {
                Some("complexity")
            } else if c.starts_with('C') {
                Some("style")
            } else {
                None
            }
        }
        "eslint" => match code {
            "no-unused-vars" => Some("unused-variable"),
            "no-undef" => Some("undefined"),
            "import/no-unresolved" => Some("import"),
            _ => None,
        },
        "bandit" => Some("security"),
        "vulture" => Some("deadcode"),
        _ => None,
    }
}

/// Per-tool class when nothing else matched.
fn tool_default_group(tool: &str) -> Option<&'static str> {
    match tool.to_lowercase().as_str() {
        "black" | "isort" | "prettier" | "gofmt" | "cargo-fmt" => Some("formatting"),
        "pytest" | "jest" | "cargo-test" | "gotest" => Some("test-failure"),
        _ => None,
    }
}

/// Compiled classification state. Built once per reconcile pass; no global
/// pattern registry.
struct Classifier {
    patterns: Vec<(&'static str, Regex)>,
    quoted: Regex,
    import_name: Regex,
    non_word: Regex,
    whitespace: Regex,
}

impl Classifier {
    fn new() -> Self {
        Classifier {
            patterns: GROUP_PATTERNS
                .iter()
                .map(|(name, pattern)| (*name, Regex::new(pattern).unwrap()))
                .collect(),
            quoted: Regex::new(r#"["'`](.*?)["'`]"#).unwrap(),
            import_name: Regex::new(r"(?i)(?:import|module)\s+(?:module\s+)?([A-Za-z0-9_./-]+)")
                .unwrap(),
            non_word: Regex::new(r"[^\w\s./-]+").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    fn classify(&self, tool: &str, code: Option<&str>, message: &str) -> &'static str {
        if let Some(group) = code.and_then(|c| code_group(tool, c)) {
            return group;
        }
        let text = format!("{} {}", code.unwrap_or(""), message);
        for (name, pattern) in &self.patterns {
            if pattern.is_match(&text) {
                return name;
            }
        }
        tool_default_group(tool).unwrap_or("generic")
    }

    /// First quoted identifier, else an `import <name>`-style token.
    fn extract_token(&self, message: &str) -> Option<String> {
        if let Some(caps) = self.quoted.captures(message) {
            let token = caps[1].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
        self.import_name
            .captures(message)
            .map(|caps| caps[1].trim().to_string())
    }

    /// Lower-cased, whitespace-collapsed, punctuation-stripped, truncated
    /// message fragment for keying unclassified findings.
    fn normalize_message(&self, message: &str) -> String {
        let lowered = message.to_lowercase();
        let stripped = self.non_word.replace_all(&lowered, "");
        let collapsed = self.whitespace.replace_all(&stripped, " ");
        collapsed.trim().chars().take(64).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    class: &'static str,
    token: String,
    file: String,
    message_fragment: String,
    line_bucket: u32,
}

/// Cross-tool reconciliation engine.
pub struct Deduper {
    cfg: DedupeConfig,
    classifier: Classifier,
}

impl Deduper {
    pub fn new(cfg: DedupeConfig) -> Self {
        Deduper {
            cfg,
            classifier: Classifier::new(),
        }
    }

    fn group_key(&self, diag: &Diagnostic, root: &Path) -> (GroupKey, &'static str) {
        let class = self
            .classifier
            .classify(&diag.tool, diag.code.as_deref(), &diag.message);
        let token = self.classifier.extract_token(&diag.message);
        let file = if self.cfg.same_file_only {
            diag.file
                .as_deref()
                .map(|f| relative_to_root(f, root))
                .unwrap_or_default()
        } else {
            String::new()
        };

        // Unclassified, token-less findings key on a normalized message
        // fragment and a line bucket so near-identical messages on nearby
        // lines still collide.
        let (message_fragment, line_bucket) = if class == "generic" && token.is_none() {
            let line = diag.line.unwrap_or(1);
            let bucket = if self.cfg.line_fuzz > 0 {
                line / (self.cfg.line_fuzz + 1)
            } else {
                line
            };
            (self.classifier.normalize_message(&diag.message), bucket)
        } else {
            (String::new(), 0)
        };

        (
            GroupKey {
                class,
                token: token.unwrap_or_default(),
                file,
                message_fragment,
                line_bucket,
            },
            class,
        )
    }

    fn tool_rank(&self, tool: &str) -> usize {
        let tool = tool.to_lowercase();
        self.cfg
            .prefer
            .iter()
            .position(|p| p.to_lowercase() == tool)
            .unwrap_or(self.cfg.prefer.len() + 100)
    }

    /// Does the challenger beat the incumbent under the configured policy?
    fn better(&self, new: &FlatDiag<'_>, old: &FlatDiag<'_>) -> bool {
        match self.cfg.tie_break {
            TieBreak::First => new.seq < old.seq,
            TieBreak::Severity => {
                let (rn, ro) = (new.diag.severity.rank(), old.diag.severity.rank());
                rn > ro || (rn == ro && new.seq < old.seq)
            }
            TieBreak::Prefer => {
                let (rn, ro) = (self.tool_rank(&new.diag.tool), self.tool_rank(&old.diag.tool));
                if rn != ro {
                    return rn < ro;
                }
                let (sn, so) = (new.diag.severity.rank(), old.diag.severity.rank());
                sn > so || (sn == so && new.seq < old.seq)
            }
        }
    }

    /// Deduplicate `run.outcomes[*].diagnostics` in place. No-op when
    /// disabled. Never fails; a second run over the same result changes
    /// nothing.
    pub fn reconcile(&self, run: &mut RunResult) {
        if !self.cfg.enabled {
            return;
        }

        // Duplicate-code diagnostics self-describe many locations; collapse
        // them per tool before the cross-tool pass.
        let mut dup_filter = duplicate_code::DuplicateCodeFilter::new(&run.root);
        for outcome in &mut run.outcomes {
            dup_filter.apply(outcome);
        }

        let flat: Vec<FlatDiag<'_>> = run
            .outcomes
            .iter()
            .enumerate()
            .flat_map(|(outcome_idx, outcome)| {
                outcome
                    .diagnostics
                    .iter()
                    .enumerate()
                    .map(move |(diag_idx, diag)| (outcome_idx, diag_idx, diag))
            })
            .enumerate()
            .map(|(seq, (outcome_idx, diag_idx, diag))| FlatDiag {
                outcome_idx,
                diag_idx,
                seq,
                diag,
            })
            .collect();
        if flat.is_empty() {
            return;
        }

        let mut winners: HashMap<GroupKey, usize> = HashMap::new();
        let mut classes: Vec<&'static str> = Vec::with_capacity(flat.len());
        for (i, entry) in flat.iter().enumerate() {
            let (key, class) = self.group_key(entry.diag, &run.root);
            classes.push(class);
            match winners.get(&key) {
                None => {
                    winners.insert(key, i);
                }
                Some(&incumbent) => {
                    if self.better(entry, &flat[incumbent]) {
                        winners.insert(key, i);
                    }
                }
            }
        }

        let keep: HashSet<(usize, usize)> = winners
            .values()
            .map(|&i| (flat[i].outcome_idx, flat[i].diag_idx))
            .collect();
        let groups: HashMap<(usize, usize), &'static str> = flat
            .iter()
            .zip(classes.iter())
            .map(|(entry, class)| ((entry.outcome_idx, entry.diag_idx), *class))
            .collect();
        drop(flat);

        for (outcome_idx, outcome) in run.outcomes.iter_mut().enumerate() {
            let mut diag_idx = 0;
            let mut survivor_classes = Vec::with_capacity(outcome.diagnostics.len());
            outcome.diagnostics.retain(|_| {
                let kept = keep.contains(&(outcome_idx, diag_idx));
                if kept {
                    survivor_classes.push(groups[&(outcome_idx, diag_idx)]);
                }
                diag_idx += 1;
                kept
            });
            for (diag, class) in outcome.diagnostics.iter_mut().zip(survivor_classes) {
                if diag.group.is_none() {
                    diag.group = Some(class.to_string());
                }
            }
        }
    }
}

struct FlatDiag<'a> {
    outcome_idx: usize,
    diag_idx: usize,
    /// Emission order across the whole run; the tie-break seed.
    seq: usize,
    diag: &'a Diagnostic,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolOutcome;
    use crate::severity::Severity;

    fn diag(tool: &str, code: Option<&str>, msg: &str, file: &str, line: u32) -> Diagnostic {
        Diagnostic {
            file: Some(file.to_string()),
            line: Some(line),
            column: Some(1),
            severity: Severity::Warning,
            message: msg.to_string(),
            tool: tool.to_string(),
            code: code.map(str::to_string),
            group: None,
            function: Some("handler".to_string()),
            hints: vec![],
            tags: vec![],
        }
    }

    fn outcome(tool: &str, diagnostics: Vec<Diagnostic>) -> ToolOutcome {
        ToolOutcome {
            tool: tool.to_string(),
            action: "check".to_string(),
            returncode: 1,
            stdout: String::new(),
            stderr: String::new(),
            raw_stdout: String::new(),
            raw_stderr: String::new(),
            diagnostics,
            cached: false,
            crashed: None,
            ignore_exit: false,
        }
    }

    fn run_with(outcomes: Vec<ToolOutcome>) -> RunResult {
        let mut run = RunResult::new("/repo", vec![]);
        run.outcomes = outcomes;
        run
    }

    fn cfg(tie_break: TieBreak) -> DedupeConfig {
        DedupeConfig {
            enabled: true,
            tie_break,
            prefer: vec![],
            line_fuzz: 2,
            same_file_only: true,
        }
    }

    fn total(run: &RunResult) -> usize {
        run.outcomes.iter().map(|o| o.diagnostics.len()).sum()
    }

    #[test]
    fn test_disabled_is_a_noop() {
        let mut run = run_with(vec![
            outcome("ruff", vec![diag("ruff", Some("F821"), "undefined name 'x'", "a.py", 3)]),
            outcome("pylint", vec![diag("pylint", Some("E0602"), "Undefined variable 'x'", "a.py", 3)]),
        ]);
        let deduper = Deduper::new(DedupeConfig::default());
        deduper.reconcile(&mut run);
        assert_eq!(total(&run), 2);
    }

    #[test]
    fn test_cross_tool_equivalent_codes_collapse() {
        let mut run = run_with(vec![
            outcome("ruff", vec![diag("ruff", Some("F821"), "undefined name 'x'", "a.py", 3)]),
            outcome("pylint", vec![diag("pylint", Some("E0602"), "Undefined variable 'x'", "a.py", 3)]),
        ]);
        Deduper::new(cfg(TieBreak::First)).reconcile(&mut run);
        assert_eq!(total(&run), 1);
        // `first`: the earliest emitted survives
        assert_eq!(run.outcomes[0].diagnostics.len(), 1);
        assert_eq!(run.outcomes[0].diagnostics[0].group.as_deref(), Some("undefined"));
    }

    #[test]
    fn test_prefer_policy_picks_listed_tool_regardless_of_order() {
        for flip in [false, true] {
            let ruff = outcome("ruff", vec![diag("ruff", Some("F821"), "undefined name 'x'", "a.py", 3)]);
            let pylint = outcome("pylint", vec![diag("pylint", Some("E0602"), "Undefined variable 'x'", "a.py", 3)]);
            let outcomes = if flip { vec![pylint, ruff] } else { vec![ruff, pylint] };
            let mut run = run_with(outcomes);
            let deduper = Deduper::new(DedupeConfig {
                enabled: true,
                tie_break: TieBreak::Prefer,
                prefer: vec!["ruff".to_string(), "pylint".to_string()],
                line_fuzz: 2,
                same_file_only: true,
            });
            deduper.reconcile(&mut run);
            let survivors: Vec<&Diagnostic> = run.diagnostics().collect();
            assert_eq!(survivors.len(), 1);
            assert_eq!(survivors[0].tool, "ruff");
        }
    }

    #[test]
    fn test_severity_policy_keeps_highest() {
        let mut low = diag("mypy", None, "something odd here", "a.py", 3);
        low.severity = Severity::Notice;
        let mut high = diag("pyright", None, "something odd here", "a.py", 4);
        high.severity = Severity::Error;
        let mut run = run_with(vec![outcome("mypy", vec![low]), outcome("pyright", vec![high])]);
        Deduper::new(cfg(TieBreak::Severity)).reconcile(&mut run);
        let survivors: Vec<&Diagnostic> = run.diagnostics().collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].severity, Severity::Error);
    }

    #[test]
    fn test_fuzzy_line_collapse() {
        let make = || {
            run_with(vec![
                outcome("toola", vec![diag("toola", None, "weird thing happened", "a.py", 10)]),
                outcome("toolb", vec![diag("toolb", None, "weird thing happened", "a.py", 11)]),
            ])
        };

        let mut fuzzy = make();
        let mut config = cfg(TieBreak::First);
        config.line_fuzz = 2;
        Deduper::new(config).reconcile(&mut fuzzy);
        assert_eq!(total(&fuzzy), 1);

        let mut exact = make();
        let mut config = cfg(TieBreak::First);
        config.line_fuzz = 0;
        Deduper::new(config).reconcile(&mut exact);
        assert_eq!(total(&exact), 2);
    }

    #[test]
    fn test_same_file_only_toggle() {
        let make = || {
            run_with(vec![
                outcome("ruff", vec![diag("ruff", Some("F821"), "undefined name 'x'", "a.py", 3)]),
                outcome("pylint", vec![diag("pylint", Some("E0602"), "Undefined variable 'x'", "b.py", 3)]),
            ])
        };

        let mut separate = make();
        Deduper::new(cfg(TieBreak::First)).reconcile(&mut separate);
        assert_eq!(total(&separate), 2);

        let mut merged = make();
        let mut config = cfg(TieBreak::First);
        config.same_file_only = false;
        Deduper::new(config).reconcile(&mut merged);
        assert_eq!(total(&merged), 1);
    }

    #[test]
    fn test_distinct_tokens_do_not_merge() {
        let mut run = run_with(vec![
            outcome("ruff", vec![
                diag("ruff", Some("F401"), "'os' imported but unused", "a.py", 1),
                diag("ruff", Some("F401"), "'sys' imported but unused", "a.py", 2),
            ]),
        ]);
        Deduper::new(cfg(TieBreak::First)).reconcile(&mut run);
        assert_eq!(total(&run), 2);
    }

    #[test]
    fn test_idempotent() {
        let mut run = run_with(vec![
            outcome("ruff", vec![diag("ruff", Some("F821"), "undefined name 'x'", "a.py", 3)]),
            outcome("pylint", vec![diag("pylint", Some("E0602"), "Undefined variable 'x'", "a.py", 3)]),
            outcome("mypy", vec![diag("mypy", None, "odd corner case", "b.py", 9)]),
        ]);
        let deduper = Deduper::new(cfg(TieBreak::First));
        deduper.reconcile(&mut run);
        let after_first: Vec<Diagnostic> = run.diagnostics().cloned().collect();
        deduper.reconcile(&mut run);
        let after_second: Vec<Diagnostic> = run.diagnostics().cloned().collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_tie_break_parse() {
        assert_eq!("first".parse::<TieBreak>().unwrap(), TieBreak::First);
        assert_eq!("PREFER".parse::<TieBreak>().unwrap(), TieBreak::Prefer);
        assert!("best".parse::<TieBreak>().is_err());
    }

    #[test]
    fn test_classifier_examples() {
        let classifier = Classifier::new();
        assert_eq!(classifier.classify("ruff", Some("F401"), "'os' imported but unused"), "unused-import");
        assert_eq!(classifier.classify("pylint", Some("R0915"), "Too many statements"), "complexity");
        assert_eq!(classifier.classify("bandit", Some("B102"), "exec used"), "security");
        assert_eq!(classifier.classify("pytest", None, "3 tests collected, 1 failure"), "test-failure");
        assert_eq!(classifier.classify("sometool", None, "mystery problem"), "generic");
    }

    #[test]
    fn test_token_extraction() {
        let classifier = Classifier::new();
        assert_eq!(classifier.extract_token("undefined name 'x'").as_deref(), Some("x"));
        assert_eq!(
            classifier.extract_token("cannot import module requests.auth").as_deref(),
            Some("requests.auth")
        );
        assert_eq!(
            classifier.extract_token("missing module os.path").as_deref(),
            Some("os.path")
        );
        assert_eq!(classifier.extract_token("no token here"), None);
    }
}
