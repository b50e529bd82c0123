//! ImportConfig - 取り込みの設定
//!
//! 読み込み順: デフォルト → JSON ファイル（任意） → `BRICKLOAD_*` 環境変数 → validate。
//! validate を通らない設定では Importer を組み立てない（fail-fast）。

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DuplicateKeyPolicy;

pub const ENV_PREFIX: &str = "BRICKLOAD_";

/// Upper bound for every `*_seconds` setting (100 years).
pub const MAX_DURATION_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    Env { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size_default: u32,
    pub batch_size_min: u32,
    pub batch_size_max: u32,
    /// Upload size in bytes.
    pub max_archive_size: u64,
    pub max_rows_per_entity: u64,
    pub job_ttl_seconds: u64,
    pub lease_ttl_seconds: u64,
    /// Decompressed bytes across all extracted sources.
    pub max_extracted_size: u64,
    /// How long an expired job stays reportable as `expired` before it is deleted.
    pub expired_retention_seconds: u64,
    pub duplicate_key_policy: DuplicateKeyPolicy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size_default: 2_000,
            batch_size_min: 100,
            batch_size_max: 10_000,
            max_archive_size: 50 * 1024 * 1024,
            max_rows_per_entity: 1_000_000,
            job_ttl_seconds: 3_600,
            lease_ttl_seconds: 120,
            max_extracted_size: 512 * 1024 * 1024,
            expired_retention_seconds: 86_400,
            duplicate_key_policy: DuplicateKeyPolicy::LastWins,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// 未検証の設定でも panic しないよう上限で頭打ちにする
fn bounded_seconds(secs: u64) -> TimeDelta {
    let secs = i64::try_from(secs.min(MAX_DURATION_SECONDS)).unwrap_or(i64::MAX);
    TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX)
}

impl ImportConfig {
    /// Read a JSON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then `path` if given, then the process environment, validated.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `BRICKLOAD_<FIELD>` variables supplied by `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{}", name.to_ascii_uppercase());
            lookup(&key).map(|value| (key, value))
        };

        if let Some((k, v)) = var("batch_size_default") {
            self.batch_size_default = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("batch_size_min") {
            self.batch_size_min = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("batch_size_max") {
            self.batch_size_max = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("max_archive_size") {
            self.max_archive_size = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("max_rows_per_entity") {
            self.max_rows_per_entity = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("job_ttl_seconds") {
            self.job_ttl_seconds = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("lease_ttl_seconds") {
            self.lease_ttl_seconds = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("max_extracted_size") {
            self.max_extracted_size = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("expired_retention_seconds") {
            self.expired_retention_seconds = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = var("duplicate_key_policy") {
            let policy = v.trim().to_ascii_lowercase();
            self.duplicate_key_policy = match policy.as_str() {
                "last_wins" => DuplicateKeyPolicy::LastWins,
                "first_wins" => DuplicateKeyPolicy::FirstWins,
                _ => return Err(ConfigError::Env { key: k, value: v }),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("batch_size_min", self.batch_size_min as u64),
            ("max_archive_size", self.max_archive_size),
            ("max_rows_per_entity", self.max_rows_per_entity),
            ("job_ttl_seconds", self.job_ttl_seconds),
            ("lease_ttl_seconds", self.lease_ttl_seconds),
            ("max_extracted_size", self.max_extracted_size),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        let durations = [
            ("job_ttl_seconds", self.job_ttl_seconds),
            ("lease_ttl_seconds", self.lease_ttl_seconds),
            ("expired_retention_seconds", self.expired_retention_seconds),
        ];
        if let Some((name, v)) = durations.iter().find(|(_, v)| *v > MAX_DURATION_SECONDS) {
            return Err(ConfigError::Invalid(format!(
                "{name} must be at most {MAX_DURATION_SECONDS} (got {v})"
            )));
        }
        if !(self.batch_size_min <= self.batch_size_default
            && self.batch_size_default <= self.batch_size_max)
        {
            return Err(ConfigError::Invalid(format!(
                "batch sizes must satisfy min <= default <= max (got {} / {} / {})",
                self.batch_size_min, self.batch_size_default, self.batch_size_max
            )));
        }
        Ok(())
    }

    pub fn job_ttl(&self) -> TimeDelta {
        bounded_seconds(self.job_ttl_seconds)
    }

    pub fn lease_ttl(&self) -> TimeDelta {
        bounded_seconds(self.lease_ttl_seconds)
    }

    pub fn expired_retention(&self) -> TimeDelta {
        bounded_seconds(self.expired_retention_seconds)
    }

    /// Requested size (or the default) clamped into `[min, max]`.
    pub fn clamp_batch(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.batch_size_default)
            .clamp(self.batch_size_min, self.batch_size_max)
    }
}
