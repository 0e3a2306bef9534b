//! Runtime configuration, read from `CODEMAP_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{CodemapError, CodemapResult};

const MIB: u64 = 1024 * 1024;

pub const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &["py", "pyi", "pyw"];

pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    "venv",
    ".venv",
    "env",
    "node_modules",
    "build",
    "dist",
];

/// Limits enforced by the archive guard before anything is extracted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLimits {
    pub max_archive_bytes: u64,
    pub max_compression_ratio: u64,
    pub max_entries: usize,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_archive_bytes: 100 * MIB,
            max_compression_ratio: 10,
            max_entries: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub workers: usize,
    /// Lowercase extensions without the leading dot.
    pub source_extensions: Vec<String>,
    pub excluded_dirs: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            source_extensions: DEFAULT_SOURCE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS
                .iter()
                .map(|dir| dir.to_string())
                .collect(),
            max_file_bytes: 4 * MIB,
        }
    }
}

impl AnalysisConfig {
    pub fn is_source_path(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.source_extensions.iter().any(|allowed| *allowed == ext)
            }
            _ => false,
        }
    }

    /// Whether any directory component of `path` is excluded.
    pub fn is_excluded(&self, path: &str) -> bool {
        let mut components: Vec<&str> = path.split('/').collect();
        components.pop();
        components
            .iter()
            .any(|component| self.excluded_dirs.iter().any(|dir| dir == component))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub enabled: bool,
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: Duration::days(7),
            sweep_interval: Duration::hours(24),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodemapConfig {
    pub storage_root: PathBuf,
    pub archive: ArchiveLimits,
    pub analysis: AnalysisConfig,
    pub retention: RetentionPolicy,
    pub logging: LoggingConfig,
}

impl Default for CodemapConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("uploads"),
            archive: ArchiveLimits::default(),
            analysis: AnalysisConfig::default(),
            retention: RetentionPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CodemapConfig {
    pub fn from_env() -> CodemapResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup. Unset or blank
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> CodemapResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(dir) = get("CODEMAP_UPLOAD_DIR") {
            config.storage_root = PathBuf::from(dir);
        }
        if let Some(mb) = parse_number::<u64>("CODEMAP_MAX_UPLOAD_SIZE_MB", &get)? {
            config.archive.max_archive_bytes = mb.saturating_mul(MIB);
        }
        if let Some(ratio) = parse_number::<u64>("CODEMAP_MAX_COMPRESSION_RATIO", &get)? {
            config.archive.max_compression_ratio = ratio;
        }
        if let Some(entries) = parse_number::<usize>("CODEMAP_MAX_ENTRIES", &get)? {
            config.archive.max_entries = entries;
        }
        if let Some(workers) = parse_number::<usize>("CODEMAP_WORKERS", &get)? {
            config.analysis.workers = workers;
        }
        if let Some(bytes) = parse_number::<u64>("CODEMAP_MAX_FILE_BYTES", &get)? {
            config.analysis.max_file_bytes = bytes;
        }
        if let Some(raw) = get("CODEMAP_CLEANUP_ENABLED") {
            config.retention.enabled = parse_bool(&raw);
        }
        if let Some(interval) =
            parse_duration("CODEMAP_CLEANUP_INTERVAL_HOURS", &get, Duration::try_hours)?
        {
            config.retention.sweep_interval = interval;
        }
        if let Some(max_age) =
            parse_duration("CODEMAP_MAX_FILE_AGE_DAYS", &get, Duration::try_days)?
        {
            config.retention.max_age = max_age;
        }
        if let Some(level) = get("CODEMAP_LOG_LEVEL") {
            config.logging.level = level.to_ascii_lowercase();
        }
        if let Some(format) = get("CODEMAP_LOG_FORMAT") {
            config.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" | "compact" => LogFormat::Text,
                other => {
                    return Err(CodemapError::Config(format!(
                        "CODEMAP_LOG_FORMAT must be json or text, got {other:?}"
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CodemapResult<()> {
        if self.archive.max_archive_bytes == 0 {
            return Err(CodemapError::Config(
                "CODEMAP_MAX_UPLOAD_SIZE_MB must be at least 1".to_string(),
            ));
        }
        if self.archive.max_compression_ratio == 0 {
            return Err(CodemapError::Config(
                "CODEMAP_MAX_COMPRESSION_RATIO must be at least 1".to_string(),
            ));
        }
        if self.archive.max_entries == 0 {
            return Err(CodemapError::Config(
                "CODEMAP_MAX_ENTRIES must be at least 1".to_string(),
            ));
        }
        if self.analysis.workers == 0 {
            return Err(CodemapError::Config(
                "CODEMAP_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.retention.sweep_interval <= Duration::zero() {
            return Err(CodemapError::Config(
                "CODEMAP_CLEANUP_INTERVAL_HOURS must be positive".to_string(),
            ));
        }
        if self.retention.max_age < Duration::zero() {
            return Err(CodemapError::Config(
                "CODEMAP_MAX_FILE_AGE_DAYS must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> bool {
    let value = raw.trim().to_lowercase();
    !matches!(value.as_str(), "0" | "false" | "no" | "off")
}

fn parse_number<T: FromStr>(
    key: &str,
    get: &impl Fn(&str) -> Option<String>,
) -> CodemapResult<Option<T>> {
    match get(key) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| CodemapError::Config(format!("{key} is not a valid number: {value:?}"))),
    }
}

/// A whole number of `unit`s; values chrono cannot represent are errors.
fn parse_duration(
    key: &str,
    get: &impl Fn(&str) -> Option<String>,
    unit: fn(i64) -> Option<Duration>,
) -> CodemapResult<Option<Duration>> {
    let Some(value) = parse_number::<i64>(key, get)? else {
        return Ok(None);
    };
    unit(value)
        .map(Some)
        .ok_or_else(|| CodemapError::Config(format!("{key} is out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = CodemapConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CodemapConfig::default());
        assert_eq!(config.archive.max_archive_bytes, 100 * MIB);
        assert_eq!(config.retention.max_age, Duration::days(7));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn reads_overrides() {
        let config = CodemapConfig::from_lookup(lookup(&[
            ("CODEMAP_UPLOAD_DIR", "/tmp/codemap"),
            ("CODEMAP_MAX_UPLOAD_SIZE_MB", "5"),
            ("CODEMAP_WORKERS", "2"),
            ("CODEMAP_CLEANUP_ENABLED", "off"),
            ("CODEMAP_MAX_FILE_AGE_DAYS", "1"),
            ("CODEMAP_LOG_FORMAT", "text"),
        ]))
        .unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/tmp/codemap"));
        assert_eq!(config.archive.max_archive_bytes, 5 * MIB);
        assert_eq!(config.analysis.workers, 2);
        assert!(!config.retention.enabled);
        assert_eq!(config.retention.max_age, Duration::days(1));
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn malformed_number_names_the_variable() {
        let err = CodemapConfig::from_lookup(lookup(&[("CODEMAP_MAX_ENTRIES", "lots")])).unwrap_err();
        assert_eq!(err.code(), "config");
        assert!(err.to_string().contains("CODEMAP_MAX_ENTRIES"));
    }

    #[test]
    fn out_of_range_durations_are_config_errors() {
        let err = CodemapConfig::from_lookup(lookup(&[(
            "CODEMAP_MAX_FILE_AGE_DAYS",
            "99999999999999",
        )]))
        .unwrap_err();
        assert_eq!(err.code(), "config");
        assert!(err.to_string().contains("CODEMAP_MAX_FILE_AGE_DAYS"));

        let err = CodemapConfig::from_lookup(lookup(&[(
            "CODEMAP_CLEANUP_INTERVAL_HOURS",
            "9223372036854775807",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("CODEMAP_CLEANUP_INTERVAL_HOURS"));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = CodemapConfig::from_lookup(lookup(&[("CODEMAP_WORKERS", "0")])).unwrap_err();
        assert!(err.to_string().contains("CODEMAP_WORKERS"));
    }

    #[test]
    fn source_path_and_exclusion_rules() {
        let analysis = AnalysisConfig::default();
        assert!(analysis.is_source_path("pkg/mod.py"));
        assert!(analysis.is_source_path("stubs/Mod.PYI"));
        assert!(!analysis.is_source_path("README.md"));
        assert!(!analysis.is_source_path(".py"));
        assert!(analysis.is_excluded("venv/lib/site.py"));
        assert!(analysis.is_excluded("a/__pycache__/x.py"));
        assert!(!analysis.is_excluded("build.py"));
    }
}
