//! Runtime configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use auction_extraction::ExtractionConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};
use crate::retry::RetryPolicy;

/// What to do with a candidate whose dedup key is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Count it and move on; no downloads
    #[default]
    Skip,
    /// Re-extract and overwrite the stored record
    Merge,
}

/// Harvest run settings.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub consulta_base_url: Url,
    pub files_base_url: Url,
    pub window_length: chrono::Duration,
    /// PNCP `codigoModalidadeContratacao` values to list
    pub modalities: Vec<u32>,
    pub page_size: u32,
    pub requests_per_second: u32,
    pub burst: u32,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub commit_partial_checkpoint: bool,
    pub duplicate_policy: DuplicatePolicy,
    /// Cap on listed candidates, for testing
    pub record_limit: Option<usize>,
}

pub const DEFAULT_CONSULTA_URL: &str = "https://pncp.gov.br/api/consulta";
pub const DEFAULT_FILES_URL: &str = "https://pncp.gov.br/pncp-api";

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            consulta_base_url: Url::parse(DEFAULT_CONSULTA_URL).expect("valid default URL"),
            files_base_url: Url::parse(DEFAULT_FILES_URL).expect("valid default URL"),
            window_length: chrono::Duration::hours(24),
            modalities: vec![1, 13],
            page_size: 50,
            requests_per_second: 2,
            burst: 2,
            concurrency: 4,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            commit_partial_checkpoint: false,
            duplicate_policy: DuplicatePolicy::Skip,
            record_limit: None,
        }
    }
}

impl HarvestConfig {
    pub fn with_record_limit(mut self, limit: usize) -> Self {
        self.record_limit = Some(limit);
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_commit_partial_checkpoint(mut self, commit: bool) -> Self {
        self.commit_partial_checkpoint = commit;
        self
    }

    pub fn with_modalities(mut self, modalities: Vec<u32>) -> Self {
        self.modalities = modalities;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub harvest: HarvestConfig,
    pub extraction_config_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let defaults = HarvestConfig::default();
        let url = |name: &str, default: &Url| -> Result<Url> {
            match var(name) {
                Some(raw) => Url::parse(raw.trim_end_matches('/'))
                    .map_err(|e| HarvestError::InvalidConfiguration(format!("{name}: {e}"))),
                None => Ok(default.clone()),
            }
        };

        let window_hours: i64 = parse_var(&var, "HARVEST_WINDOW_HOURS", 24)?;
        let requests_per_second: u32 = parse_var(&var, "HARVEST_REQUESTS_PER_SECOND", 2)?;
        let concurrency: usize = parse_var(&var, "HARVEST_CONCURRENCY", 4)?;
        let max_attempts: u32 = parse_var(&var, "HARVEST_MAX_ATTEMPTS", 3)?;
        let commit_partial: bool = parse_var(&var, "HARVEST_COMMIT_PARTIAL", false)?;

        if window_hours <= 0 {
            return Err(HarvestError::InvalidConfiguration(
                "HARVEST_WINDOW_HOURS must be positive".into(),
            ));
        }
        if requests_per_second == 0 || concurrency == 0 {
            return Err(HarvestError::InvalidConfiguration(
                "HARVEST_REQUESTS_PER_SECOND and HARVEST_CONCURRENCY must be positive".into(),
            ));
        }

        let harvest = HarvestConfig {
            consulta_base_url: url("PNCP_CONSULTA_URL", &defaults.consulta_base_url)?,
            files_base_url: url("PNCP_FILES_URL", &defaults.files_base_url)?,
            window_length: chrono::Duration::hours(window_hours),
            requests_per_second,
            burst: requests_per_second.max(defaults.burst),
            concurrency,
            retry: RetryPolicy::new(max_attempts, defaults.retry.base_delay),
            commit_partial_checkpoint: commit_partial,
            ..defaults
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            harvest,
            extraction_config_path: var("EXTRACTION_CONFIG").map(PathBuf::from),
        })
    }

    /// `DATABASE_URL`, required by every command that touches Postgres.
    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| HarvestError::ConfigurationMissing {
                name: "DATABASE_URL".into(),
            })
    }

    /// The extraction configuration file, or the built-in defaults.
    pub fn extraction_config(&self) -> Result<ExtractionConfig> {
        let config = match &self.extraction_config_path {
            Some(path) => ExtractionConfig::from_json_file(path)?,
            None => ExtractionConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| HarvestError::InvalidConfiguration(format!("{name}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.harvest.consulta_base_url.as_str(), "https://pncp.gov.br/api/consulta");
        assert_eq!(config.harvest.window_length, chrono::Duration::hours(24));
        assert_eq!(config.harvest.modalities, vec![1, 13]);
        assert_eq!(config.harvest.retry.max_attempts, 3);
        assert!(!config.harvest.commit_partial_checkpoint);
        assert!(matches!(
            config.database_url(),
            Err(HarvestError::ConfigurationMissing { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/leiloes"),
            ("HARVEST_WINDOW_HOURS", "48"),
            ("HARVEST_CONCURRENCY", "8"),
            ("HARVEST_COMMIT_PARTIAL", "true"),
            ("PNCP_FILES_URL", "http://localhost:9000/pncp-api/"),
        ])
        .unwrap();

        assert_eq!(config.database_url().unwrap(), "postgres://localhost/leiloes");
        assert_eq!(config.harvest.window_length, chrono::Duration::hours(48));
        assert_eq!(config.harvest.concurrency, 8);
        assert!(config.harvest.commit_partial_checkpoint);
        assert_eq!(config.harvest.files_base_url.as_str(), "http://localhost:9000/pncp-api");
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = load(&[("HARVEST_MAX_ATTEMPTS", "three")]).unwrap_err();
        assert!(matches!(err, HarvestError::InvalidConfiguration(ref msg) if msg.contains("HARVEST_MAX_ATTEMPTS")));
    }
}
