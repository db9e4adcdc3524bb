use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_VERSIONS: &str = "2.1,2.2";
const DEFAULT_UNDERSTANDING_BASE_URL: &str = "https://www.w3.org/WAI";

/// Application configuration loaded explicitly from environment variables.
///
/// Paths have no defaults; everything else does. Redis and the snapshot command are
/// optional and their absence disables the corresponding feature.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL. `None` disables the chunk cache.
    pub redis_url: Option<String>,
    /// LanceDB data directory. The index manifest lives here too.
    pub lancedb_path: String,
    /// Root of the WCAG data: `raw/wcag-<version>.json` in, `processed/` out.
    pub data_dir: PathBuf,
    /// Versions indexed at startup.
    pub versions: Vec<String>,
    /// Program and arguments that turn markup on stdin into an AX tree on stdout.
    pub snapshot_command: Option<Vec<String>>,
    pub snapshot_timeout: Duration,
    pub snapshot_retries: u32,
    /// Bound on each embedding or rerank call made while serving a request.
    pub model_timeout: Duration,
    pub top_k: usize,
    /// Optional cap on related requirements per success criterion.
    pub related_limit: Option<usize>,
    pub benefits_cache_path: PathBuf,
    pub understanding_base_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LANCEDB_PATH`
    /// - `WCAG_DATA_DIR`
    ///
    /// Optional: `REDIS_URL`, `WCAG_VERSIONS`, `WCAG_SNAPSHOT_COMMAND`,
    /// `WCAG_SNAPSHOT_TIMEOUT_SECS`, `WCAG_SNAPSHOT_RETRIES`, `WCAG_MODEL_TIMEOUT_SECS`,
    /// `WCAG_TOP_K`, `WCAG_RELATED_LIMIT`, `WCAG_BENEFITS_CACHE`,
    /// `WCAG_UNDERSTANDING_BASE_URL`.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lancedb_path = lookup("LANCEDB_PATH").ok_or_else(|| {
            AppError::Config("LANCEDB_PATH environment variable is required".to_string())
        })?;

        let data_dir = lookup("WCAG_DATA_DIR").map(PathBuf::from).ok_or_else(|| {
            AppError::Config("WCAG_DATA_DIR environment variable is required".to_string())
        })?;
        if !data_dir.is_dir() {
            return Err(AppError::Config(format!(
                "WCAG_DATA_DIR is not a directory: {}",
                data_dir.display()
            )));
        }

        let versions: Vec<String> = lookup("WCAG_VERSIONS")
            .unwrap_or_else(|| DEFAULT_VERSIONS.to_string())
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if versions.is_empty() {
            return Err(AppError::Config("WCAG_VERSIONS lists no versions".to_string()));
        }

        let snapshot_command = lookup("WCAG_SNAPSHOT_COMMAND")
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty());

        let snapshot_timeout =
            Duration::from_secs(parse_or(&lookup, "WCAG_SNAPSHOT_TIMEOUT_SECS", 30u64)?);
        let snapshot_retries = parse_or(&lookup, "WCAG_SNAPSHOT_RETRIES", 1u32)?;
        let model_timeout =
            Duration::from_secs(parse_or(&lookup, "WCAG_MODEL_TIMEOUT_SECS", 60u64)?);

        let top_k = parse_or(&lookup, "WCAG_TOP_K", 20usize)?;
        if top_k == 0 {
            return Err(AppError::Config("WCAG_TOP_K must be at least 1".to_string()));
        }

        let related_limit = match lookup("WCAG_RELATED_LIMIT") {
            Some(raw) => Some(parse_value::<usize>("WCAG_RELATED_LIMIT", &raw)?),
            None => None,
        };

        let benefits_cache_path = lookup("WCAG_BENEFITS_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("benefits_cache.json"));

        let understanding_base_url = lookup("WCAG_UNDERSTANDING_BASE_URL")
            .unwrap_or_else(|| DEFAULT_UNDERSTANDING_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            redis_url: lookup("REDIS_URL"),
            lancedb_path,
            data_dir,
            versions,
            snapshot_command,
            snapshot_timeout,
            snapshot_retries,
            model_timeout,
            top_k,
            related_limit,
            benefits_cache_path,
            understanding_base_url,
        })
    }

    /// Path of the published specification JSON for a version.
    pub fn raw_spec_path(&self, version: &str) -> PathBuf {
        raw_spec_path(&self.data_dir, version)
    }

    /// Path of the flattened chunk corpus for a version.
    pub fn processed_corpus_path(&self, version: &str) -> PathBuf {
        self.data_dir
            .join("processed")
            .join(format!("wcag-{version}_preprocessed.json"))
    }
}

pub fn raw_spec_path(data_dir: &Path, version: &str) -> PathBuf {
    data_dir.join("raw").join(format!("wcag-{version}.json"))
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AppError::Config(format!("{name} has an invalid value: '{raw}'")))
}
