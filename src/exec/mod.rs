//! Tool invocation: cache lookup, subprocess run, output filtering, parsing.
//!
//! One `ToolInvocation` describes a single tool action (for example `ruff
//! check` or `eslint fix`). `run_action` turns it into a `ToolOutcome`,
//! consulting the result cache first and storing fresh results on the way
//! out. `run_all` schedules many invocations across a rayon pool, keeping
//! each tool's actions sequential so a fixer never races its own checker.

use crate::cache::{fingerprint_for, CacheKey, CachePayload, ResultCache, VersionCache};
use crate::dedupe::{DedupeConfig, Deduper};
use crate::model::{normalize_all, RunResult, ToolOutcome};
use crate::parse::{Parser, Payload};
use crate::severity::SeverityRules;
use crate::util::run_command_with_timeout;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Line filters applied to captured output before parsing. Tools print
/// progress noise (download bars, "All done!" banners) that would otherwise
/// confuse text parsers.
#[derive(Debug, Default)]
pub struct OutputFilter {
    patterns: Vec<Regex>,
}

impl OutputFilter {
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OutputFilter { patterns })
    }

    /// Drop every line matching any filter pattern.
    pub fn apply(&self, text: &str) -> String {
        if self.patterns.is_empty() {
            return text.to_string();
        }
        let mut out: String = text
            .lines()
            .filter(|line| !self.patterns.iter().any(|p| p.is_match(line)))
            .collect::<Vec<_>>()
            .join("\n");
        if text.ends_with('\n') && !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// One tool action to execute.
#[derive(Debug)]
pub struct ToolInvocation {
    pub tool: String,
    pub action: String,
    /// Full argv; `cmd[0]` is the executable.
    pub cmd: Vec<String>,
    /// Files this action reads, for cache validation.
    pub files: Vec<PathBuf>,
    pub timeout: Option<Duration>,
    /// Treat nonzero exit as success (fixers exit 1 when they changed files).
    pub ignore_exit: bool,
    pub filter: OutputFilter,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, action: impl Into<String>, cmd: Vec<String>) -> Self {
        ToolInvocation {
            tool: tool.into(),
            action: action.into(),
            cmd,
            files: Vec::new(),
            timeout: None,
            ignore_exit: false,
            filter: OutputFilter::default(),
        }
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }
}

/// Shared state for a pipeline run.
pub struct ExecContext {
    pub root: PathBuf,
    pub cache: Option<ResultCache>,
    pub versions: Mutex<VersionCache>,
    pub rules: SeverityRules,
    pub parser: Parser,
}

impl ExecContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ExecContext {
            root: root.into(),
            cache: None,
            versions: Mutex::new(VersionCache::new()),
            rules: SeverityRules::new(),
            parser: Parser::new(),
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn fingerprint(&self, invocation: &ToolInvocation) -> String {
        let mut versions = match self.versions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        fingerprint_for(&mut versions, &invocation.tool, &invocation.cmd, &self.root)
    }
}

fn outcome_from_cache(invocation: &ToolInvocation, payload: CachePayload) -> ToolOutcome {
    ToolOutcome {
        tool: invocation.tool.clone(),
        action: invocation.action.clone(),
        returncode: payload.rc,
        stdout: payload.stdout,
        stderr: payload.stderr,
        raw_stdout: payload.raw_stdout,
        raw_stderr: payload.raw_stderr,
        diagnostics: payload.diagnostics,
        cached: true,
        crashed: None,
        ignore_exit: invocation.ignore_exit,
    }
}

fn crashed_outcome(invocation: &ToolInvocation, reason: String) -> ToolOutcome {
    ToolOutcome {
        tool: invocation.tool.clone(),
        action: invocation.action.clone(),
        returncode: -1,
        stdout: String::new(),
        stderr: String::new(),
        raw_stdout: String::new(),
        raw_stderr: String::new(),
        diagnostics: Vec::new(),
        cached: false,
        crashed: Some(reason),
        ignore_exit: invocation.ignore_exit,
    }
}

/// Execute a single tool action, cache-aware.
pub fn run_action(ctx: &ExecContext, invocation: &ToolInvocation) -> ToolOutcome {
    let token;
    let key = if let Some(cache) = &ctx.cache {
        token = ctx.fingerprint(invocation);
        let key = CacheKey {
            tool: &invocation.tool,
            action: &invocation.action,
            cmd: &invocation.cmd,
            files: &invocation.files,
            token: &token,
        };
        if let Some(payload) = cache.load(&key) {
            return outcome_from_cache(invocation, payload);
        }
        Some(key)
    } else {
        None
    };

    if invocation.cmd.is_empty() {
        return crashed_outcome(invocation, "empty command".to_string());
    }
    let mut command = Command::new(&invocation.cmd[0]);
    command.args(&invocation.cmd[1..]).current_dir(&ctx.root);

    let timeout = invocation.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let result = match run_command_with_timeout(&mut command, timeout) {
        Ok(result) => result,
        Err(err) => {
            warn!(tool = %invocation.tool, error = %err, "spawn failed");
            return crashed_outcome(invocation, err);
        }
    };
    if result.timed_out {
        // Timeouts are never cached; the next run should retry.
        return crashed_outcome(
            invocation,
            format!("timed out after {}s", timeout.as_secs()),
        );
    }
    let returncode = result
        .status
        .and_then(|s| s.code())
        .unwrap_or(-1);

    let stdout = invocation.filter.apply(&result.stdout);
    let stderr = invocation.filter.apply(&result.stderr);

    // Several tools (cargo, mypy via wrappers) report on stderr when stdout
    // is silent.
    let payload = if stdout.trim().is_empty() && !stderr.trim().is_empty() {
        Payload::decode(&stderr)
    } else {
        Payload::decode(&stdout)
    };
    let raws = ctx.parser.parse(&invocation.tool, &payload, &ctx.root);
    let diagnostics = normalize_all(raws, &ctx.root, &ctx.rules);

    if let (Some(cache), Some(key)) = (&ctx.cache, key) {
        cache.store(
            &key,
            CachePayload {
                rc: returncode,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
                raw_stdout: result.stdout.clone(),
                raw_stderr: result.stderr.clone(),
                diagnostics: diagnostics.clone(),
                ts: chrono::Utc::now(),
                files_meta: Vec::new(),
            },
        );
    }

    ToolOutcome {
        tool: invocation.tool.clone(),
        action: invocation.action.clone(),
        returncode,
        stdout,
        stderr,
        raw_stdout: result.stdout,
        raw_stderr: result.stderr,
        diagnostics,
        cached: false,
        crashed: None,
        ignore_exit: invocation.ignore_exit,
    }
}

/// Execute all invocations and assemble a `RunResult`.
///
/// Invocations are grouped by tool; groups run in parallel across `jobs`
/// workers while actions within a group run in declaration order, so a
/// tool's fix action always completes before its check action.
pub fn run_all(
    ctx: &ExecContext,
    invocations: Vec<ToolInvocation>,
    files: Vec<PathBuf>,
    jobs: usize,
    dedupe: &DedupeConfig,
) -> RunResult {
    let mut run = RunResult::new(ctx.root.clone(), files);

    // Expired entries are swept once per run, not per action.
    if let Some(cache) = &ctx.cache {
        cache.prune();
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ToolInvocation>> = HashMap::new();
    for invocation in invocations {
        if !groups.contains_key(&invocation.tool) {
            order.push(invocation.tool.clone());
        }
        groups.entry(invocation.tool.clone()).or_default().push(invocation);
    }
    let grouped: Vec<(String, Vec<ToolInvocation>)> = order
        .into_iter()
        .map(|tool| {
            let batch = groups.remove(&tool).unwrap_or_default();
            (tool, batch)
        })
        .collect();

    let outcomes: Vec<Vec<ToolOutcome>> = match rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
    {
        Ok(pool) => pool.install(|| {
            grouped
                .par_iter()
                .map(|(_, batch)| batch.iter().map(|inv| run_action(ctx, inv)).collect())
                .collect()
        }),
        Err(err) => {
            warn!(error = %err, "thread pool unavailable, running serially");
            grouped
                .iter()
                .map(|(_, batch)| batch.iter().map(|inv| run_action(ctx, inv)).collect())
                .collect()
        }
    };
    run.outcomes = outcomes.into_iter().flatten().collect();

    {
        let mut versions = match ctx.versions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (tool, batch) in &grouped {
            if let Some(first) = batch.first() {
                let version = versions.version_for(&first.cmd);
                if !version.is_empty() {
                    run.tool_versions.insert(tool.clone(), version);
                }
            }
        }
    }

    Deduper::new(dedupe.clone()).reconcile(&mut run);
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_output_filter_drops_matching_lines() {
        let filter = OutputFilter::new(&["^All done".to_string()]).unwrap();
        let text = "All done! ✨\nreal.py:1:1: oops\n";
        assert_eq!(filter.apply(text), "real.py:1:1: oops\n");
    }

    #[test]
    fn test_output_filter_rejects_bad_pattern() {
        assert!(OutputFilter::new(&["(".to_string()]).is_err());
    }

    #[test]
    fn test_run_action_parses_generic_output() {
        let ctx = ExecContext::new("/tmp");
        let invocation = ToolInvocation::new(
            "sometool",
            "check",
            sh("printf 'a.py:3:1: something odd\\n'; exit 1"),
        );
        let outcome = run_action(&ctx, &invocation);
        assert_eq!(outcome.returncode, 1);
        assert!(outcome.crashed.is_none());
        assert!(!outcome.cached);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].line, Some(3));
        assert!(!outcome.ok());
    }

    #[test]
    fn test_run_action_reads_stderr_when_stdout_empty() {
        let ctx = ExecContext::new("/tmp");
        let invocation = ToolInvocation::new(
            "sometool",
            "check",
            sh("printf 'a.py:5:2: stderr finding\\n' >&2; exit 1"),
        );
        let outcome = run_action(&ctx, &invocation);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].line, Some(5));
    }

    #[test]
    fn test_run_action_spawn_failure_is_crash() {
        let ctx = ExecContext::new("/tmp");
        let invocation = ToolInvocation::new(
            "ghost",
            "check",
            vec!["definitely-not-a-real-binary-xyz".to_string()],
        );
        let outcome = run_action(&ctx, &invocation);
        assert!(outcome.crashed.is_some());
        assert_eq!(outcome.returncode, -1);
    }

    #[test]
    fn test_run_action_timeout_is_crash_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let ctx = ExecContext::new("/tmp").with_cache(ResultCache::new(&cache_dir));
        let mut invocation = ToolInvocation::new("slow", "check", sh("sleep 5"));
        invocation.timeout = Some(Duration::from_millis(100));
        let outcome = run_action(&ctx, &invocation);
        assert!(outcome.crashed.is_some());

        // Nothing was persisted; the next run must execute again.
        let entries = std::fs::read_dir(&cache_dir)
            .map(|it| it.count())
            .unwrap_or(0);
        assert_eq!(entries, 0);
    }

    #[test]
    fn test_run_action_caches_and_replays() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.py");
        std::fs::write(&target, "x = 1\n").unwrap();
        let cache = ResultCache::new(dir.path().join("cache"));
        let ctx = ExecContext::new(dir.path()).with_cache(cache);
        let invocation = ToolInvocation::new(
            "sometool",
            "check",
            sh("printf 'a.py:3:1: something odd\\n'; exit 1"),
        )
        .with_files(vec![target.clone()]);
        let first = run_action(&ctx, &invocation);
        assert!(!first.cached);
        let second = run_action(&ctx, &invocation);
        assert!(second.cached);
        assert_eq!(second.diagnostics, first.diagnostics);
        assert_eq!(second.returncode, first.returncode);

        // Editing a watched file invalidates the entry
        std::fs::write(&target, "x = 2\ny = 3\n").unwrap();
        let third = run_action(&ctx, &invocation);
        assert!(!third.cached);
    }

    #[test]
    fn test_ignore_exit_marks_outcome_ok() {
        let ctx = ExecContext::new("/tmp");
        let mut invocation = ToolInvocation::new("fixer", "fix", sh("exit 1"));
        invocation.ignore_exit = true;
        let outcome = run_action(&ctx, &invocation);
        assert_eq!(outcome.returncode, 1);
        assert!(outcome.ok());
    }

    #[test]
    fn test_run_all_preserves_declaration_order() {
        let ctx = ExecContext::new("/tmp");
        let invocations = vec![
            ToolInvocation::new("b-tool", "fix", sh("exit 0")),
            ToolInvocation::new("a-tool", "check", sh("exit 0")),
            ToolInvocation::new("b-tool", "check", sh("exit 0")),
        ];
        let run = run_all(&ctx, invocations, vec![], 4, &DedupeConfig::default());
        let labels: Vec<(String, String)> = run
            .outcomes
            .iter()
            .map(|o| (o.tool.clone(), o.action.clone()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("b-tool".to_string(), "fix".to_string()),
                ("b-tool".to_string(), "check".to_string()),
                ("a-tool".to_string(), "check".to_string()),
            ]
        );
    }

    #[test]
    fn test_run_all_prunes_expired_entries_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        let stale = cache_dir.join("deadbeef.json");
        std::fs::write(&stale, "{}").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let cache = ResultCache::with_ttl(&cache_dir, Duration::from_millis(1));
        let ctx = ExecContext::new("/tmp").with_cache(cache);
        let invocations = vec![ToolInvocation::new("sometool", "check", sh("exit 0"))];
        run_all(&ctx, invocations, vec![], 1, &DedupeConfig::default());
        assert!(!stale.exists());
    }

    #[test]
    fn test_run_all_applies_dedupe_when_enabled() {
        let ctx = ExecContext::new("/tmp");
        let invocations = vec![
            ToolInvocation::new("toola", "check", sh("printf 'a.py:3:1: weird thing\\n'")),
            ToolInvocation::new("toolb", "check", sh("printf 'a.py:3:1: weird thing\\n'")),
        ];
        let mut cfg = DedupeConfig::default();
        cfg.enabled = true;
        let run = run_all(&ctx, invocations, vec![], 2, &cfg);
        assert_eq!(run.diagnostics().count(), 1);
    }
}
