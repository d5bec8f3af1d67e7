//! Duplicate-code diagnostic collapsing
//!
//! Pylint reports duplicated blocks once per participating location, and each
//! report enumerates every other location in its message body (`== name:[12:18]`
//! lines). One report per duplicate group is enough. The filter parses the
//! referenced locations, keys the group on the sorted set of them, keeps only
//! the first report per group, and re-anchors that survivor onto the most
//! useful referenced location.

use crate::model::{Diagnostic, ToolOutcome};
use crate::util::relative_to_root;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const DUPLICATE_PREFIX: &str = "==";
const SEARCH_PREFIXES: &[&str] = &["", "src/", "tests/"];

/// One location referenced by a duplicate-code message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCodeEntry {
    /// Grouping key: lower-cased normalized path, plus the span when present.
    pub key: String,
    pub path: String,
    pub line: Option<u32>,
}

fn is_duplicate_code(code: Option<&str>) -> bool {
    matches!(
        code.map(str::to_uppercase).as_deref(),
        Some("R0801") | Some("DUPLICATE-CODE")
    )
}

fn is_init_path(path: &str) -> bool {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name == "__init__.py" || name == "__init__.pyi"
}

fn is_test_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/").to_lowercase();
    normalized.starts_with("tests/") || normalized.contains("/tests/")
}

/// Stateful per-run filter. Applies only to pylint `R0801`/`duplicate-code`
/// diagnostics; everything else passes through untouched.
pub struct DuplicateCodeFilter {
    root: PathBuf,
    seen_groups: HashSet<Vec<String>>,
    trailing_span: Regex,
}

impl DuplicateCodeFilter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DuplicateCodeFilter {
            root: root.into(),
            seen_groups: HashSet::new(),
            trailing_span: Regex::new(r":(\d+)(?::(\d+))?\s*$").unwrap(),
        }
    }

    /// Drop redundant duplicate-code diagnostics from one tool outcome.
    pub fn apply(&mut self, outcome: &mut ToolOutcome) {
        if outcome.tool != "pylint" {
            return;
        }
        let mut kept = Vec::with_capacity(outcome.diagnostics.len());
        for mut diag in outcome.diagnostics.drain(..) {
            if !is_duplicate_code(diag.code.as_deref()) || self.keep(&mut diag) {
                kept.push(diag);
            }
        }
        outcome.diagnostics = kept;
    }

    fn keep(&mut self, diag: &mut Diagnostic) -> bool {
        let entries = self.collect_entries(&diag.message);
        if entries.is_empty() {
            // Nothing to group on; leave the diagnostic alone.
            return true;
        }
        if entries.iter().all(|e| is_init_path(&e.path)) {
            // Package re-export boilerplate, duplicated by construction.
            return false;
        }

        let mut group_key: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        group_key.sort();
        group_key.dedup();
        if !self.seen_groups.insert(group_key) {
            return false;
        }

        if let Some(primary) = self.select_primary(&entries, diag) {
            diag.file = Some(primary.path.clone());
            if primary.line.is_some() {
                diag.line = primary.line;
            }
        }

        !self.context_is_commented(diag)
    }

    /// Anchor onto the entry matching the diagnostic's current file, else the
    /// first non-test location, else the first entry.
    fn select_primary<'a>(
        &self,
        entries: &'a [DuplicateCodeEntry],
        diag: &Diagnostic,
    ) -> Option<&'a DuplicateCodeEntry> {
        let current = diag
            .file
            .as_deref()
            .map(|f| relative_to_root(f, &self.root))
            .unwrap_or_default();
        if !current.is_empty() {
            if let Some(entry) = entries
                .iter()
                .find(|e| relative_to_root(&e.path, &self.root) == current)
            {
                return Some(entry);
            }
        }
        entries
            .iter()
            .find(|e| !is_test_path(&e.path))
            .or_else(|| entries.first())
    }

    /// Duplicated comment blocks are not actionable; check the surrounding
    /// context and, as a last resort, the anchored source line on disk.
    fn context_is_commented(&self, diag: &Diagnostic) -> bool {
        if let Some(function) = &diag.function {
            if function.trim_start().starts_with('#') {
                return true;
            }
        }
        if let Some(first) = snippet_lines(&diag.message).first() {
            if first.starts_with('#') {
                return true;
            }
        }
        if let (Some(file), Some(line)) = (&diag.file, diag.line) {
            if let Some(source) = read_source_line(&self.root, file, line) {
                if source.trim_start().starts_with('#') {
                    return true;
                }
            }
        }
        false
    }

    fn collect_entries(&self, message: &str) -> Vec<DuplicateCodeEntry> {
        let lines: Vec<&str> = message
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let mut details: Vec<String> = lines
            .iter()
            .skip(1)
            .filter(|l| l.starts_with(DUPLICATE_PREFIX))
            .map(|l| l[DUPLICATE_PREFIX.len()..].trim().to_string())
            .collect();

        // Legacy single-line form: "Similar lines in 2 files: a.py, b.py"
        if details.is_empty() {
            if let Some(first) = lines.first() {
                if let Some((_, suffix)) = first.split_once(':') {
                    details.extend(
                        suffix
                            .split(',')
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(str::to_string),
                    );
                }
            }
        }

        let mut entries = Vec::new();
        for detail in details {
            let (name, span) = self.split_entry(&detail);
            if name.is_empty() {
                continue;
            }
            let path = self.resolve_target(&name);
            let mut key = path.replace('\\', "/").to_lowercase();
            if !span.is_empty() {
                key = format!("{}|{}", key, span.to_lowercase());
            }
            entries.push(DuplicateCodeEntry {
                key,
                path,
                line: parse_span_line(&span),
            });
        }
        entries
    }

    /// Split `pkg.module:[12:18]` (or trailing `:12:18`) into name and span.
    fn split_entry(&self, entry: &str) -> (String, String) {
        let stripped = entry.trim();
        if let Some(bracket) = stripped.find('[') {
            let name = stripped[..bracket].trim_end_matches(':').trim();
            return (name.to_string(), stripped[bracket..].trim().to_string());
        }
        if let Some(caps) = self.trailing_span.captures(stripped) {
            let whole = caps.get(0).map(|m| m.start()).unwrap_or(stripped.len());
            let name = stripped[..whole].trim_end_matches(':').trim();
            let span = match caps.get(2) {
                Some(end) => format!("[{}:{}]", &caps[1], end.as_str()),
                None => format!("[{}]", &caps[1]),
            };
            return (name.to_string(), span);
        }
        (stripped.to_string(), String::new())
    }

    /// Map a pylint target (dotted module or path fragment) to a path,
    /// preferring variants that exist on disk under common layout prefixes.
    fn resolve_target(&self, name: &str) -> String {
        let variants = path_variants(name);
        for variant in &variants {
            let candidate = Path::new(variant);
            if candidate.is_absolute() && candidate.exists() {
                return relative_to_root(variant, &self.root);
            }
        }
        for variant in &variants {
            for prefix in SEARCH_PREFIXES {
                let candidate = self.root.join(prefix).join(variant);
                if candidate.exists() {
                    let joined = format!("{}{}", prefix, variant);
                    return joined;
                }
            }
        }
        fallback_variant(&variants, name)
    }
}

/// Candidate path spellings for a duplicate target name.
fn path_variants(name: &str) -> Vec<String> {
    let token = name
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .replace('\\', "/");
    if token.is_empty() {
        return Vec::new();
    }

    let mut base = vec![token.clone()];
    let dotted = token.replace('.', "/");
    if dotted != token {
        base.push(dotted);
    }

    let mut seen = HashSet::new();
    let mut variants = Vec::new();
    for variant in base {
        let cleaned = variant.trim_start_matches(['.', '/']).to_string();
        if cleaned.is_empty() {
            continue;
        }
        if seen.insert(cleaned.clone()) {
            variants.push(cleaned.clone());
        }
        if Path::new(&cleaned).extension().is_none() {
            let with_ext = format!("{}.py", cleaned);
            if seen.insert(with_ext.clone()) {
                variants.push(with_ext);
            }
            if !cleaned.ends_with("__init__") {
                let init = format!("{}/__init__.py", cleaned);
                if seen.insert(init.clone()) {
                    variants.push(init);
                }
            }
        }
    }
    variants
}

fn fallback_variant(variants: &[String], original: &str) -> String {
    let pick = variants
        .iter()
        .find(|v| v.contains('/') && (v.ends_with(".py") || v.ends_with(".pyi")))
        .or_else(|| variants.iter().find(|v| v.contains('/')))
        .or_else(|| variants.first());
    let mut chosen = match pick {
        Some(v) => v.clone(),
        None => original.trim().replace('\\', "/"),
    };
    if Path::new(&chosen).extension().is_none() {
        chosen.push_str(".py");
    }
    chosen.trim_start_matches("./").to_string()
}

/// Starting line from a span token like `[12:18]`.
fn parse_span_line(span: &str) -> Option<u32> {
    let cleaned = span
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    cleaned.split(':').next()?.parse().ok()
}

/// Code snippet lines quoted in the message body, minus the `==` headers.
fn snippet_lines(message: &str) -> Vec<String> {
    message
        .lines()
        .skip(1)
        .map(str::trim_start)
        .filter(|l| !l.is_empty() && !l.starts_with(DUPLICATE_PREFIX))
        .map(str::to_string)
        .collect()
}

fn read_source_line(root: &Path, file: &str, line_no: u32) -> Option<String> {
    let candidate = Path::new(file);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let handle = File::open(resolved).ok()?;
    BufReader::new(handle)
        .lines()
        .nth(line_no.saturating_sub(1) as usize)?
        .ok()
}
