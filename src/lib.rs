//! polylint — diagnostic pipeline core for a multi-tool lint runner.
//!
//! Takes the raw output of heterogeneous static-analysis tools (ruff, pylint,
//! mypy, eslint, golangci-lint, cargo, ...) and turns it into one coherent
//! diagnostic stream:
//!
//! - [`parse`] decodes each tool's native output (JSON, JSONL, or text) into
//!   raw diagnostics, and [`model`] normalizes them into a common shape with
//!   project-relative paths and reconciled severities.
//! - [`cache`] is a content-addressed store of prior tool outcomes, keyed on
//!   argv and a tool-version/config fingerprint and validated against file
//!   metadata, so unchanged inputs skip the subprocess entirely.
//! - [`dedupe`] collapses cross-tool duplicates (ruff's F821 and pylint's
//!   E0602 are the same undefined name) under a configurable tie-break
//!   policy, and folds pylint duplicate-code clusters to one report each.
//! - [`exec`] runs tool actions through the cache with timeouts and output
//!   filtering, parallel across tools and sequential within one.
//!
//! [`config::PipelineConfig`] validates the knobs up front. Report
//! rendering, CLI parsing, and tool catalogs live in the outer application,
//! not here.

pub mod cache;
pub mod config;
pub mod dedupe;
pub mod exec;
pub mod model;
pub mod parse;
pub mod severity;
pub mod util;

pub use cache::{CacheKey, CachePayload, ResultCache, VersionCache};
pub use config::{PipelineConfig, PipelineSettings};
pub use dedupe::{DedupeConfig, Deduper, TieBreak};
pub use exec::{run_action, run_all, ExecContext, OutputFilter, ToolInvocation};
pub use model::{Diagnostic, RawDiagnostic, RunResult, ToolOutcome};
pub use parse::{Parser, Payload};
pub use severity::{Severity, SeverityRules};
