use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Top-level configuration loaded from hertz-health.toml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub paths: PathsConfig,
    pub probe: ProbeConfig,
    pub heartbeat: HeartbeatConfig,
    pub supervisor: SupervisorConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub marker_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub staleness_threshold_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    pub error_retry_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub start_period_secs: u64,
    pub retries: u32,
    pub stop_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub limit: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

// --- Default implementations ---

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data"),
            cache_dir: None,
            marker_file: "health_status".to_string(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 30,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            error_retry_secs: 1,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 30,
            start_period_secs: 15,
            retries: 3,
            stop_grace_secs: 10,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            limit: "2GB".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ProbeConfig {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }
}

impl CacheConfig {
    /// Cache limit in bytes, parsed from the human-readable `limit`.
    pub fn limit_bytes(&self) -> u64 {
        parse_size(&self.limit)
    }
}

impl HealthConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to resolve variable names.
    ///
    /// Recognized: `DATA_DIR`, `CACHE_DIR`, `CACHE_LIMIT`, `LOG_LEVEL`, `DEBUG`.
    /// Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("CACHE_DIR") {
            self.paths.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(limit) = get("CACHE_LIMIT") {
            self.cache.limit = limit;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(debug) = get("DEBUG") {
            self.logging.debug = matches!(debug.to_lowercase().as_str(), "true" | "1" | "yes");
        }
    }

    /// Reject settings that would make the probe or supervisor meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (
                self.probe.staleness_threshold_secs == 0,
                "probe.staleness_threshold_secs must be > 0",
            ),
            (
                self.heartbeat.interval_secs == 0,
                "heartbeat.interval_secs must be > 0",
            ),
            (
                self.supervisor.interval_secs == 0,
                "supervisor.interval_secs must be > 0",
            ),
            (
                self.supervisor.timeout_secs == 0,
                "supervisor.timeout_secs must be > 0",
            ),
            (self.supervisor.retries == 0, "supervisor.retries must be > 0"),
            (
                self.paths.marker_file.trim().is_empty(),
                "paths.marker_file must not be empty",
            ),
        ];

        for (failed, message) in checks {
            if failed {
                return Err(ConfigError::Invalid {
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }

    /// The effective tracing filter directive, honoring `DEBUG` over `LOG_LEVEL`.
    pub fn log_directive(&self) -> String {
        if self.logging.debug {
            "debug".to_string()
        } else {
            self.logging.level.to_lowercase()
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<HealthConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(HealthConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

const DEFAULT_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

static SIZE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.]+)([KMGT]?B)?$").expect("size pattern is valid"));

/// Parse a size like `2GB` or `512mb` into bytes (1024-based units).
///
/// Falls back to 2 GiB with a warning on anything unparseable.
pub fn parse_size(size: &str) -> u64 {
    let upper = size.trim().to_uppercase();
    let Some(caps) = SIZE_PATTERN.captures(&upper) else {
        tracing::warn!(size, "invalid size format, using default of 2GB");
        return DEFAULT_SIZE_BYTES;
    };

    let number: f64 = match caps[1].parse() {
        Ok(n) => n,
        Err(_) => {
            tracing::warn!(size, "invalid size number, using default of 2GB");
            return DEFAULT_SIZE_BYTES;
        }
    };

    let multiplier: u64 = match caps.get(2).map(|m| m.as_str()).unwrap_or("B") {
        "KB" => 1024,
        "MB" => 1024u64.pow(2),
        "GB" => 1024u64.pow(3),
        "TB" => 1024u64.pow(4),
        _ => 1,
    };

    (number * multiplier as f64) as u64
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid {
        message: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid { message } => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_observed_configuration() {
        let config = HealthConfig::default();
        assert_eq!(config.paths.data_dir, PathBuf::from("/data"));
        assert_eq!(config.paths.marker_file, "health_status");
        assert_eq!(config.probe.staleness_threshold_secs, 30);
        assert_eq!(config.heartbeat.interval_secs, 10);
        assert_eq!(config.supervisor.interval_secs, 30);
        assert_eq!(config.supervisor.timeout_secs, 30);
        assert_eq!(config.supervisor.start_period_secs, 15);
        assert_eq!(config.supervisor.retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.probe.staleness_threshold_secs, 30);
    }

    #[test]
    fn test_load_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hertz-health.toml");
        std::fs::write(
            &path,
            "[probe]\nstaleness_threshold_secs = 60\n\n[supervisor]\nretries = 5\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.probe.staleness_threshold_secs, 60);
        assert_eq!(config.supervisor.retries, 5);
        assert_eq!(config.supervisor.interval_secs, 30);
        assert_eq!(config.paths.marker_file, "health_status");
    }

    #[test]
    fn test_load_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[probe\nstaleness = ").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HealthConfig::default();
        config.apply_env_from(env(&[
            ("DATA_DIR", "/srv/hertz"),
            ("CACHE_DIR", "/var/cache/hertz"),
            ("CACHE_LIMIT", "512MB"),
            ("LOG_LEVEL", "WARN"),
        ]));

        assert_eq!(config.paths.data_dir, PathBuf::from("/srv/hertz"));
        assert_eq!(
            config.paths.cache_dir,
            Some(PathBuf::from("/var/cache/hertz"))
        );
        assert_eq!(config.cache.limit_bytes(), 512 * 1024 * 1024);
        assert_eq!(config.log_directive(), "warn");
    }

    #[test]
    fn test_env_empty_values_ignored() {
        let mut config = HealthConfig::default();
        config.apply_env_from(env(&[("DATA_DIR", ""), ("LOG_LEVEL", "  ")]));
        assert_eq!(config.paths.data_dir, PathBuf::from("/data"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_debug_env_forces_debug_level() {
        for value in ["true", "1", "YES"] {
            let mut config = HealthConfig::default();
            config.apply_env_from(env(&[("DEBUG", value), ("LOG_LEVEL", "error")]));
            assert_eq!(config.log_directive(), "debug", "DEBUG={value}");
        }

        let mut config = HealthConfig::default();
        config.apply_env_from(env(&[("DEBUG", "false")]));
        assert_eq!(config.log_directive(), "info");
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = HealthConfig::default();
        config.probe.staleness_threshold_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("staleness_threshold_secs"));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let mut config = HealthConfig::default();
        config.supervisor.retries = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("2GB"), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("512mb"), 512 * 1024 * 1024);
        assert_eq!(parse_size("1KB"), 1024);
        assert_eq!(parse_size("1TB"), 1024u64.pow(4));
        assert_eq!(parse_size("100"), 100);
        assert_eq!(parse_size("100B"), 100);
        assert_eq!(parse_size("1.5GB"), 3 * 512 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_invalid_falls_back() {
        assert_eq!(parse_size("lots"), DEFAULT_SIZE_BYTES);
        assert_eq!(parse_size("2 GB"), DEFAULT_SIZE_BYTES);
        assert_eq!(parse_size("1.2.3GB"), DEFAULT_SIZE_BYTES);
        assert_eq!(parse_size(""), DEFAULT_SIZE_BYTES);
    }
}
