//! Best-effort enclosing-symbol recovery
//!
//! Dedup granularity improves when two tools agree on the function a finding
//! sits in, but most tools only report file/line. For the common source
//! kinds we scan the file once for definition headers and attribute each
//! diagnostic to the nearest preceding symbol. Anything unreadable or
//! unrecognized simply leaves `function` unset.

use crate::model::RawDiagnostic;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

struct SymbolPatterns {
    py_def: Regex,
    py_class: Regex,
    ts_class: Regex,
    ts_func: Regex,
    ts_const_func: Regex,
}

impl SymbolPatterns {
    fn new() -> Self {
        SymbolPatterns {
            py_def: Regex::new(r"^\s*(?:async\s+)?def\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*\(")
                .unwrap(),
            py_class: Regex::new(r"^\s*class\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*(?:\(|:)?")
                .unwrap(),
            ts_class: Regex::new(r"^\s*(?:export\s+)?class\s+(?P<name>[A-Za-z0-9_$]+)").unwrap(),
            ts_func: Regex::new(
                r"^\s*(?:export\s+)?(?:async\s+)?function\s+(?P<name>[A-Za-z0-9_$]+)",
            )
            .unwrap(),
            ts_const_func: Regex::new(
                r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z0-9_$]+)\s*=\s*(?:async\s+)?(?:\(|[A-Za-z0-9_$,\s]*=>)",
            )
            .unwrap(),
        }
    }

    fn scan(&self, path: &Path) -> Vec<(u32, String)> {
        let Ok(content) = fs::read_to_string(path) else {
            return Vec::new();
        };
        let python = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("py" | "pyi")
        );
        let mut symbols = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let caps = if python {
                self.py_def
                    .captures(line)
                    .or_else(|| self.py_class.captures(line))
            } else {
                self.ts_func
                    .captures(line)
                    .or_else(|| self.ts_class.captures(line))
                    .or_else(|| self.ts_const_func.captures(line))
            };
            if let Some(caps) = caps {
                symbols.push((line_no, caps["name"].to_string()));
            }
        }
        symbols
    }
}

const SYMBOL_SUFFIXES: &[&str] = &["py", "pyi", "ts", "tsx", "js", "jsx", "mjs"];

fn resolve_source(file: &str, root: &Path) -> Option<PathBuf> {
    let path = Path::new(file);
    let suffix = path.extension().and_then(|e| e.to_str())?;
    if !SYMBOL_SUFFIXES.contains(&suffix) {
        return None;
    }
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    resolved.is_file().then_some(resolved)
}

/// Fill in `function` for diagnostics that lack one, memoizing the per-file
/// symbol scan across the batch.
pub fn attach_functions(raws: &mut [RawDiagnostic], root: &Path) {
    let patterns = SymbolPatterns::new();
    let mut memo: HashMap<String, Vec<(u32, String)>> = HashMap::new();

    for raw in raws.iter_mut() {
        if raw.function.is_some() {
            continue;
        }
        let (Some(file), Some(line)) = (raw.file.clone(), raw.line) else {
            continue;
        };
        let Some(path) = resolve_source(&file, root) else {
            continue;
        };
        let symbols = memo
            .entry(file)
            .or_insert_with(|| patterns.scan(&path));
        let enclosing = symbols
            .iter()
            .take_while(|(sym_line, _)| *sym_line <= line)
            .last();
        if let Some((_, name)) = enclosing {
            raw.function = Some(name.clone());
        }
    }
}
