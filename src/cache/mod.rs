//! Content-addressed result cache for tool actions
//!
//! One JSON file per entry, keyed by a hash of everything that can change a
//! tool's output: the command line, the tool version, and the tool's config
//! files. The current file set is validated against a stored metadata
//! snapshot on every load, so touching any input file invalidates the entry.
//!
//! # Error Handling
//!
//! Cache operations are best-effort by design. A corrupt or unreadable entry
//! is a miss, a failed write is dropped with a warning, and pruning failures
//! are ignored: cache trouble must never fail or block a run.

use crate::model::Diagnostic;
use crate::util::{hash_bytes, run_command_with_timeout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default entry lifetime before pruning.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity and size snapshot for one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub mtime_ns: u64,
    pub size: u64,
}

/// Persisted payload of one cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePayload {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
    pub raw_stdout: String,
    pub raw_stderr: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Write time, used for TTL pruning.
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub files_meta: Vec<FileMeta>,
}

/// Inputs that identify one tool action execution.
#[derive(Debug, Clone, Copy)]
pub struct CacheKey<'a> {
    pub tool: &'a str,
    pub action: &'a str,
    pub cmd: &'a [String],
    pub files: &'a [PathBuf],
    /// Fingerprint token: tool version + config-file digest.
    pub token: &'a str,
}

impl CacheKey<'_> {
    /// Deterministic hex key. The argv is joined with NUL, which cannot
    /// appear inside an argument. The working directory is deliberately not
    /// part of the key; file identity is validated separately via metadata,
    /// so caches survive checkouts at different paths.
    pub fn digest(&self) -> String {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.tool.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.action.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.cmd.join("\0").as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.token.as_bytes());
        hash_bytes(&buf)
    }
}

fn meta_of(path: &Path) -> Option<FileMeta> {
    let meta = fs::metadata(path).ok()?;
    let mtime_ns = meta
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_nanos() as u64;
    Some(FileMeta {
        path: path.to_string_lossy().to_string(),
        mtime_ns,
        size: meta.len(),
    })
}

/// Collect current metadata for the whole file set, or `None` if any file
/// cannot be inspected (deleted mid-run, permissions). Callers treat that as
/// a hard miss: never serve an entry whose inputs cannot be verified.
fn current_meta(files: &[PathBuf]) -> Option<Vec<FileMeta>> {
    files.iter().map(|f| meta_of(f)).collect()
}

/// On-disk cache of prior tool action outcomes.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ResultCache {
            dir: dir.into(),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        ResultCache { dir: dir.into(), ttl }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Load a prior outcome for `key`, or miss.
    ///
    /// Misses on: no entry file, unparseable entry, file-count mismatch,
    /// any `(mtime, size)` drift, or uncollectable current file state.
    pub fn load(&self, key: &CacheKey<'_>) -> Option<CachePayload> {
        let path = self.entry_path(&key.digest());
        let data = fs::read_to_string(&path).ok()?;
        let payload: CachePayload = serde_json::from_str(&data).ok()?;

        let current = current_meta(key.files)?;
        if current.len() != payload.files_meta.len() {
            return None;
        }
        let stored: HashMap<&str, (u64, u64)> = payload
            .files_meta
            .iter()
            .map(|m| (m.path.as_str(), (m.mtime_ns, m.size)))
            .collect();
        for meta in &current {
            if stored.get(meta.path.as_str()) != Some(&(meta.mtime_ns, meta.size)) {
                return None;
            }
        }
        debug!(key = %key.digest(), tool = key.tool, "cache hit");
        Some(payload)
    }

    /// Persist an outcome, best-effort. The file metadata snapshot is taken
    /// at store time so later loads validate against what the tool saw.
    pub fn store(&self, key: &CacheKey<'_>, mut payload: CachePayload) {
        payload.files_meta = key
            .files
            .iter()
            .map(|f| {
                meta_of(f).unwrap_or_else(|| FileMeta {
                    path: f.to_string_lossy().to_string(),
                    mtime_ns: 0,
                    size: 0,
                })
            })
            .collect();
        payload.ts = Utc::now();

        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("cache dir creation failed: {}", e);
            return;
        }
        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                warn!("cache serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(self.entry_path(&key.digest()), json) {
            warn!("cache write failed: {}", e);
        }
    }

    /// Remove entries older than the TTL. Best-effort; failures are ignored.
    pub fn prune(&self) {
        let Some(cutoff) = SystemTime::now().checked_sub(self.ttl) else {
            return;
        };
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if stale {
                let _ = fs::remove_file(&path);
            }
        }
    }
}

/// Combine a tool's version string and config digest into the fingerprint
/// token the cache key hashes over.
pub fn fingerprint_token(version: &str, config_hash: &str) -> String {
    format!("{}|{}", version, config_hash)
}

/// Digest over the declared config files' `(path, mtime, size)` identities.
/// Missing files contribute their path only, so appearing or disappearing
/// still changes the digest.
pub fn hash_config_files(paths: &[PathBuf]) -> String {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();
    sorted.dedup();
    let mut buf = Vec::new();
    for path in sorted {
        buf.extend_from_slice(path.to_string_lossy().as_bytes());
        buf.push(0);
        match meta_of(path) {
            Some(meta) => {
                buf.extend_from_slice(meta.mtime_ns.to_string().as_bytes());
                buf.push(0);
                buf.extend_from_slice(meta.size.to_string().as_bytes());
            }
            None => buf.push(b'0'),
        }
        buf.push(0);
    }
    hash_bytes(&buf)
}

/// Well-known configuration files per tool. Editing any of these must
/// invalidate that tool's cache entries.
pub fn config_files_for(tool: &str, root: &Path) -> Vec<PathBuf> {
    let patterns: &[&str] = match tool.to_lowercase().as_str() {
        "black" | "isort" | "vulture" | "pytest" => &["pyproject.toml"],
        "ruff" => &["pyproject.toml", "ruff.toml"],
        "mypy" => &["pyproject.toml", "mypy.ini", "setup.cfg"],
        "pylint" => &[".pylintrc", "pyproject.toml"],
        "pyright" => &["pyproject.toml", "pyrightconfig.json"],
        "bandit" => &["pyproject.toml"],
        "eslint" => &["package.json", ".eslintrc*"],
        "prettier" => &["package.json", ".prettierrc*"],
        "tsc" => &["tsconfig*.json"],
        "jest" => &["package.json", "jest.config.*"],
        "golangci-lint" => &["go.mod", "go.sum", ".golangci.yml", ".golangci.yaml"],
        "go" | "govet" | "gotest" => &["go.mod"],
        "cargo" | "clippy" | "cargo-fmt" | "cargo-test" => &["Cargo.toml"],
        _ => &[],
    };

    let mut paths = Vec::new();
    for pattern in patterns {
        if pattern.contains('*') {
            paths.extend(glob_in_root(root, pattern));
        } else {
            let candidate = root.join(pattern);
            if candidate.exists() {
                paths.push(candidate);
            }
        }
    }
    paths
}

/// Minimal single-`*` filename glob within the project root.
fn glob_in_root(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let Some((prefix, suffix)) = pattern.split_once('*') else {
        return Vec::new();
    };
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut matches: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(prefix) && name.ends_with(suffix)
        })
        .map(|e| e.path())
        .collect();
    matches.sort();
    matches
}

/// Memoized `--version` probing, one probe per distinct executable.
///
/// Explicit state rather than a process-wide map; the executor shares one
/// instance across workers behind a lock.
#[derive(Debug, Default)]
pub struct VersionCache {
    probed: HashMap<String, String>,
}

impl VersionCache {
    pub fn new() -> Self {
        VersionCache::default()
    }

    /// Best-effort version string for the program a command invokes; empty
    /// when the probe fails.
    pub fn version_for(&mut self, cmd: &[String]) -> String {
        let prog = program_name(cmd);
        if prog.is_empty() {
            return String::new();
        }
        if let Some(version) = self.probed.get(&prog) {
            return version.clone();
        }
        let version = probe_version(&prog);
        self.probed.insert(prog, version.clone());
        version
    }
}

/// The program a command actually runs, seeing through `uv run <tool>`.
fn program_name(cmd: &[String]) -> String {
    if cmd.is_empty() {
        return String::new();
    }
    if cmd[0] == "uv" && cmd.len() >= 3 && cmd[1] == "run" {
        return cmd[2].clone();
    }
    Path::new(&cmd[0])
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn version_args(prog: &str) -> &'static [&'static str] {
    match prog {
        "eslint" => &["-v"],
        "tsc" => &["-v"],
        "golangci-lint" => &["version", "--format", "short"],
        "go" => &["version"],
        "gitleaks" => &["version"],
        _ => &["--version"],
    }
}

fn probe_version(prog: &str) -> String {
    let mut command = Command::new(prog);
    command.args(version_args(prog));
    match run_command_with_timeout(&mut command, VERSION_PROBE_TIMEOUT) {
        Ok(result) if result.status.map(|s| s.success()).unwrap_or(false) => result
            .stdout
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

/// Convenience: the full fingerprint token for a tool at `root`, including
/// the version probe.
pub fn fingerprint_for(
    versions: &mut VersionCache,
    tool: &str,
    cmd: &[String],
    root: &Path,
) -> String {
    let version = versions.version_for(cmd);
    let config_hash = hash_config_files(&config_files_for(tool, root));
    fingerprint_token(&version, &config_hash)
}
