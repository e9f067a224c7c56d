//! Configuration record (§6) and its loading/validation.
//!
//! The record is a single JSON document, the way the teacher's `Config`
//! is a single YAML document: deserialized with `serde`, validated with
//! `validator`, then optionally overridden by CLI flags before the server
//! boots.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{ProxyError, ProxyResult};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// Single-origin convenience form; superseded by `origins` when both are set.
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default = "ServerConfig::default_health_endpoint")]
    pub health_endpoint: String,
    #[serde(default = "ServerConfig::default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    fn default_port() -> u16 {
        8080
    }
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_health_endpoint() -> String {
        "/__health".to_string()
    }
    fn default_shutdown_timeout() -> u64 {
        30
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: Self::default_port(),
            host: Self::default_host(),
            origin: None,
            health_endpoint: Self::default_health_endpoint(),
            shutdown_timeout_secs: Self::default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Brotli,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Gzip
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// "purge" (default) drops all entries on an epoch mismatch; "coexist"
    /// leaves old-epoch entries servable until they expire or are evicted.
    #[serde(default = "VersioningConfig::default_mode")]
    pub mode: String,
}

impl VersioningConfig {
    fn default_mode() -> String {
        "purge".to_string()
    }

    pub fn is_purge(&self) -> bool {
        self.mode != "coexist"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "CacheConfig::default_dir")]
    pub dir: String,
    /// Default TTL, in seconds.
    #[serde(default = "CacheConfig::default_ttl_secs")]
    pub default_ttl: u64,
    #[serde(default = "CacheConfig::default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "CacheConfig::default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub cache_key_headers: Vec<String>,
    /// Glob pattern (matched against the request path) -> TTL in seconds.
    #[serde(default)]
    pub pattern_ttl: HashMap<String, u64>,
    #[serde(default = "CacheConfig::default_version")]
    pub version: String,
    #[serde(default)]
    pub versioning: VersioningConfig,
    /// Echo the opaque cache key back as `X-Cache-Key` (diagnostic only).
    #[serde(default)]
    pub expose_key: bool,
    /// Upper bound, in bytes, on a buffered origin response considered for
    /// admission (and for storage in general).
    #[serde(default = "CacheConfig::default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "CacheConfig::default_request_timeout_ms")]
    pub origin_timeout_ms: u64,

    #[serde(default)]
    pub validator_override: Option<bool>,
}

impl CacheConfig {
    fn default_dir() -> String {
        "./cache-data".to_string()
    }
    fn default_ttl_secs() -> u64 {
        300
    }
    fn default_max_entries() -> usize {
        10_000
    }
    fn default_max_size_mb() -> u64 {
        256
    }
    fn default_version() -> String {
        "1".to_string()
    }
    fn default_max_body_bytes() -> usize {
        10 * 1024 * 1024
    }
    fn default_request_timeout_ms() -> u64 {
        10_000
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            dir: Self::default_dir(),
            default_ttl: Self::default_ttl_secs(),
            max_entries: Self::default_max_entries(),
            max_size_mb: Self::default_max_size_mb(),
            compression: Compression::default(),
            cache_key_headers: Vec::new(),
            pattern_ttl: HashMap::new(),
            version: Self::default_version(),
            versioning: VersioningConfig::default(),
            expose_key: false,
            max_body_bytes: Self::default_max_body_bytes(),
            origin_timeout_ms: Self::default_request_timeout_ms(),
            validator_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub exclude_authenticated_requests: bool,
    #[serde(default = "SecurityConfig::default_max_request_size")]
    pub max_request_size: usize,
}

impl SecurityConfig {
    fn default_max_request_size() -> usize {
        5 * 1024 * 1024
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            exclude_authenticated_requests: false,
            max_request_size: Self::default_max_request_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub requests_per_hour: Option<u32>,
    #[serde(default)]
    pub global_limit: Option<u32>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "HealthCheckConfig::default_interval")]
    pub interval: u64,
    #[serde(default = "HealthCheckConfig::default_timeout")]
    pub timeout: u64,
    #[serde(default = "HealthCheckConfig::default_path")]
    pub path: String,
    #[serde(default = "HealthCheckConfig::default_method")]
    pub method: String,
    #[serde(default)]
    pub origins: Vec<String>,
}

impl HealthCheckConfig {
    fn default_interval() -> u64 {
        30
    }
    fn default_timeout() -> u64 {
        5
    }
    fn default_path() -> String {
        "/".to_string()
    }
    fn default_method() -> String {
        "HEAD".to_string()
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        HealthCheckConfig {
            enabled: true,
            interval: Self::default_interval(),
            timeout: Self::default_timeout(),
            path: Self::default_path(),
            method: Self::default_method(),
            origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfigEntry {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
    fn default_format() -> String {
        "text".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Self::default_level(),
            format: Self::default_format(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_origins"))]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub origins: HashMap<String, String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub plugins: Vec<PluginConfigEntry>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    fn validate_origins(cfg: &Config) -> Result<(), ValidationError> {
        if cfg.origins.is_empty() && cfg.server.origin.is_none() {
            let mut err = ValidationError::new("no_origin");
            err.message = Some("either server.origin or at least one entry in origins must be set".into());
            return Err(err);
        }
        Ok(())
    }

    /// Load and validate a configuration record from a JSON file.
    pub fn load_from_file(path: &Path) -> ProxyResult<Config> {
        let text = fs::read_to_string(path)
            .map_err(|e| ProxyError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
        let cfg: Config = serde_json::from_str(&text)
            .map_err(|e| ProxyError::ConfigInvalid(format!("parsing {}: {e}", path.display())))?;
        cfg.validate()
            .map_err(|e| ProxyError::ConfigInvalid(format!("validation failed: {e}")))?;
        Ok(cfg)
    }

    /// Apply CLI overrides on top of a loaded (or default) configuration.
    pub fn merge_with_opt(mut self, port: Option<u16>, origin: Option<String>) -> Config {
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(origin) = origin {
            self.server.origin = Some(origin);
        }
        self
    }

    /// Resolve the fallback single origin, if any (`origins["default"]` takes
    /// precedence over `server.origin`).
    pub fn default_origin(&self) -> Option<&str> {
        self.origins
            .get("default")
            .map(|s| s.as_str())
            .or(self.server.origin.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_invalid_without_any_origin() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_with_server_origin_validates() {
        let mut cfg = Config::default();
        cfg.server.origin = Some("http://localhost:9000".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_with_origins_map_validates() {
        let mut cfg = Config::default();
        cfg.origins.insert("default".to_string(), "http://a".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_minimal_json() {
        let json = r#"{"server": {"origin": "http://localhost:9000"}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.cache.default_ttl, 300);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn merge_with_opt_overrides_port_and_origin() {
        let cfg = Config::default().merge_with_opt(Some(9999), Some("http://x".to_string()));
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.server.origin.as_deref(), Some("http://x"));
    }

    #[test]
    fn max_size_bytes_converts_mb() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.max_size_bytes(), cfg.max_size_mb * 1024 * 1024);
    }
}
