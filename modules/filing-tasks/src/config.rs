use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::finalize::RetryPolicy;
use crate::pairer::TargetCounts;

/// Stage defaults loaded from an optional TOML file. CLI flags override them.
/// Secrets and the client identifier stay in the environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub assemble: AssembleConfig,
    #[serde(default)]
    pub finalize: FinalizeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub forms: Vec<String>,
    pub min_date: NaiveDate,
    pub max_per_company: usize,
    pub request_delay_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            forms: vec!["10-K".to_string()],
            min_date: NaiveDate::from_ymd_opt(2023, 10, 1).unwrap_or_default(),
            max_per_company: 2,
            request_delay_ms: 200,
        }
    }
}

impl IndexConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssembleConfig {
    pub a_count: usize,
    pub b_count: usize,
    pub c_yoy_count: usize,
    pub c_peer_count: usize,
}

impl Default for AssembleConfig {
    fn default() -> Self {
        let targets = TargetCounts::default();
        Self {
            a_count: targets.a,
            b_count: targets.b,
            c_yoy_count: targets.c_yoy,
            c_peer_count: targets.c_peer,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinalizeConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub blocked_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub render_timeout_secs: u64,
    /// Failure ledger path; defaults to `failed_rows.csv` inside the output directory.
    pub ledger: Option<PathBuf>,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            concurrency: 2,
            max_attempts: retry.max_attempts,
            retry_base_ms: retry.base_delay.as_millis() as u64,
            blocked_delay_ms: retry.blocked_delay.as_millis() as u64,
            max_jitter_ms: retry.max_jitter.as_millis() as u64,
            render_timeout_secs: 60,
            ledger: None,
        }
    }
}

impl FinalizeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            blocked_delay: Duration::from_millis(self.blocked_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// The filing host requires automated clients to identify themselves with a
/// contact address, e.g. `"Acme Research ops@acme.example"`.
pub fn validate_client_identifier(raw: &str) -> std::result::Result<String, PipelineError> {
    let trimmed = raw.trim();
    let has_contact = trimmed
        .split_whitespace()
        .any(|word| matches!(word.split_once('@'), Some((user, host)) if !user.is_empty() && host.contains('.')));
    if has_contact {
        Ok(trimmed.to_string())
    } else {
        Err(PipelineError::InvalidClientIdentifier(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.index.forms, vec!["10-K".to_string()]);
        assert_eq!(config.index.max_per_company, 2);
        assert_eq!(config.assemble.a_count, 40);
        assert_eq!(config.assemble.c_peer_count, 10);
        assert_eq!(config.finalize.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [index]
            min_date = "2024-01-01"
            forms = ["10-K", "10-Q"]

            [finalize]
            concurrency = 4
            ledger = "out/failed.csv"
            "#,
        )
        .unwrap();
        assert_eq!(config.index.min_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(config.index.request_delay(), Duration::from_millis(200));
        assert_eq!(config.finalize.concurrency, 4);
        assert_eq!(config.finalize.max_attempts, 3);
        assert_eq!(config.finalize.ledger, Some(PathBuf::from("out/failed.csv")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("[finalize]\nworkers = 3\n").is_err());
        assert!(toml::from_str::<FileConfig>("[upload]\n").is_err());
    }

    #[test]
    fn client_identifier_needs_contact() {
        assert_eq!(
            validate_client_identifier("  Acme Research ops@acme.example ").unwrap(),
            "Acme Research ops@acme.example"
        );
        assert!(matches!(
            validate_client_identifier("Mozilla/5.0"),
            Err(PipelineError::InvalidClientIdentifier(_))
        ));
        assert!(validate_client_identifier("me@localhost").is_err());
    }
}
