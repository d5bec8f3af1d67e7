//! Pipeline configuration with eager validation.
//!
//! Everything that can be rejected is rejected before any tool runs: an
//! unknown tie-break policy is a hard error, while malformed custom severity
//! rule specs are collected as warnings and skipped so one typo does not
//! abort a whole run.

use crate::cache::{ResultCache, DEFAULT_TTL};
use crate::dedupe::DedupeConfig;
use crate::severity::SeverityRules;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_JOBS: usize = 4;

/// Raw, unvalidated settings as a front end would collect them.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub dedupe: bool,
    /// Policy name: `first`, `severity`, or `prefer`.
    pub dedupe_by: Option<String>,
    pub dedupe_prefer: Vec<String>,
    pub dedupe_line_fuzz: Option<u32>,
    pub dedupe_same_file_only: Option<bool>,
    /// Custom severity rules, `TOOL:REGEX=LEVEL`.
    pub severity_rules: Vec<String>,
    pub jobs: Option<usize>,
    /// Cache directory; `None` disables result caching.
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl: Option<Duration>,
}

/// Validated configuration ready for the executor.
pub struct PipelineConfig {
    pub dedupe: DedupeConfig,
    pub rules: SeverityRules,
    pub jobs: usize,
    pub cache: Option<ResultCache>,
    /// Non-fatal validation complaints, one per skipped input.
    pub warnings: Vec<String>,
}

impl PipelineConfig {
    /// Validate `settings` and build the runtime configuration.
    ///
    /// Fails on an unknown tie-break policy name. Malformed severity rule
    /// specs are skipped with a recorded warning.
    pub fn build(settings: PipelineSettings) -> Result<Self> {
        let tie_break = match &settings.dedupe_by {
            Some(name) => name.parse()?,
            None => Default::default(),
        };
        let mut dedupe = DedupeConfig {
            enabled: settings.dedupe,
            tie_break,
            prefer: settings.dedupe_prefer,
            ..DedupeConfig::default()
        };
        if let Some(fuzz) = settings.dedupe_line_fuzz {
            dedupe.line_fuzz = fuzz;
        }
        if let Some(same_file) = settings.dedupe_same_file_only {
            dedupe.same_file_only = same_file;
        }

        let mut rules = SeverityRules::new();
        let mut warnings = Vec::new();
        for spec in &settings.severity_rules {
            if let Err(err) = rules.add_rule(spec) {
                warn!(spec = %spec, error = %err, "skipping severity rule");
                warnings.push(format!("ignoring severity rule '{}': {}", spec, err));
            }
        }

        let cache = settings.cache_dir.map(|dir| {
            ResultCache::with_ttl(dir, settings.cache_ttl.unwrap_or(DEFAULT_TTL))
        });

        Ok(PipelineConfig {
            dedupe,
            rules,
            jobs: settings.jobs.unwrap_or(DEFAULT_JOBS).max(1),
            cache,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::TieBreak;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::build(PipelineSettings::default()).unwrap();
        assert!(!config.dedupe.enabled);
        assert_eq!(config.dedupe.tie_break, TieBreak::First);
        assert_eq!(config.dedupe.line_fuzz, 2);
        assert!(config.dedupe.same_file_only);
        assert_eq!(config.jobs, DEFAULT_JOBS);
        assert!(config.cache.is_none());
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn test_unknown_policy_is_hard_error() {
        let settings = PipelineSettings {
            dedupe_by: Some("best".to_string()),
            ..Default::default()
        };
        assert!(PipelineConfig::build(settings).is_err());
    }

    #[test]
    fn test_bad_severity_rule_collected_as_warning() {
        let settings = PipelineSettings {
            severity_rules: vec![
                "ruff:^E9=error".to_string(),
                "not-a-rule".to_string(),
                "ruff:(=error".to_string(),
            ],
            ..Default::default()
        };
        let config = PipelineConfig::build(settings).unwrap();
        assert_eq!(config.warnings.len(), 2);
        assert!(config.warnings[0].contains("not-a-rule"));
    }

    #[test]
    fn test_jobs_floor_is_one() {
        let settings = PipelineSettings {
            jobs: Some(0),
            ..Default::default()
        };
        let config = PipelineConfig::build(settings).unwrap();
        assert_eq!(config.jobs, 1);
    }

    #[test]
    fn test_prefer_policy_round_trip() {
        let settings = PipelineSettings {
            dedupe: true,
            dedupe_by: Some("prefer".to_string()),
            dedupe_prefer: vec!["ruff".to_string()],
            dedupe_line_fuzz: Some(0),
            ..Default::default()
        };
        let config = PipelineConfig::build(settings).unwrap();
        assert_eq!(config.dedupe.tie_break, TieBreak::Prefer);
        assert_eq!(config.dedupe.prefer, vec!["ruff".to_string()]);
        assert_eq!(config.dedupe.line_fuzz, 0);
    }
}
