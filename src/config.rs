//! Broker configuration.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. the CLI `--config` flag)
//! 2. `~/.bragi/config.toml` (user)
//! 3. `/etc/bragi/config.toml` (system)
//!
//! The API key may be omitted from the file; it then falls back to the
//! `BRAGI_API_KEY` environment variable.
//!
//! Every field can change while the broker runs, either through
//! [`SpeechBroker::reconfigure`](crate::SpeechBroker::reconfigure) or a
//! `tokio::sync::watch` channel passed to
//! [`SpeechBroker::watch_config`](crate::SpeechBroker::watch_config).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{BragiError, Result};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV_VAR: &str = "BRAGI_API_KEY";

/// Top-level broker configuration.
///
/// ```rust
/// # use bragi::{BrokerConfig, CacheConfig, CacheKind};
/// let config = BrokerConfig::new()
///     .api_url("http://tts.internal:5000/")
///     .max_simultaneous_generations(4)
///     .cache(CacheConfig::new().kind(CacheKind::File).max_entries(500));
/// assert_eq!(config.api_url, "http://tts.internal:5000");
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the generation service. Default: `http://localhost:5000`.
    pub api_url: String,
    /// Bearer token sent with every request, if set.
    pub api_key: Option<String>,
    /// Per-attempt HTTP timeout in seconds. Default: 15.
    pub request_timeout_secs: u64,
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry, doubled after each failure. Default: 100ms.
    pub retry_base_delay_ms: u64,
    /// Generations allowed to hit the upstream at once. Default: 1.
    pub max_simultaneous_generations: usize,
    /// Requests allowed to be queued or generating at once. Default: 20.
    pub max_queued: usize,
    /// Longest text accepted by [`SpeechBroker::speak`](crate::SpeechBroker::speak). Default: 200.
    pub max_text_chars: usize,
    /// Wait between connectivity probes in milliseconds. Default: 15s.
    pub probe_interval_ms: u64,
    pub cache: CacheConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".to_string(),
            api_key: None,
            request_timeout_secs: 15,
            max_retries: 3,
            retry_base_delay_ms: 100,
            max_simultaneous_generations: 1,
            max_queued: 20,
            max_text_chars: 200,
            probe_interval_ms: 15_000,
            cache: CacheConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service base URL. Trailing slashes are trimmed.
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the bearer token.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the per-attempt HTTP timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the number of retries after the first attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the number of concurrent upstream generations.
    pub fn max_simultaneous_generations(mut self, n: usize) -> Self {
        self.max_simultaneous_generations = n;
        self
    }

    /// Set the queue limit.
    pub fn max_queued(mut self, n: usize) -> Self {
        self.max_queued = n;
        self
    }

    /// Set the text length ceiling.
    pub fn max_text_chars(mut self, n: usize) -> Self {
        self.max_text_chars = n;
        self
    }

    /// Set the wait between connectivity probes.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the cache configuration.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay_duration(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn probe_interval_duration(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.bragi/config.toml`
    /// 3. `/etc/bragi/config.toml`
    ///
    /// When none exists and no explicit path was given, defaults are used.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.normalize();
        if config.api_key.is_none() {
            config.api_key = std::env::var(API_KEY_ENV_VAR).ok().filter(|k| !k.is_empty());
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| BragiError::Configuration(format!("Failed to parse config: {e}")))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_simultaneous_generations == 0 {
            return Err(BragiError::Configuration(
                "max_simultaneous_generations must be at least 1".to_string(),
            ));
        }
        if self.probe_interval_ms == 0 {
            return Err(BragiError::Configuration(
                "probe_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BragiError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml(&content).map_err(|e| {
            BragiError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(BragiError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".bragi").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/bragi/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    fn normalize(&mut self) {
        self.api_url = self.api_url.trim_end_matches('/').to_string();
        if self.api_key.as_deref() == Some("") {
            self.api_key = None;
        }
    }
}

/// Which cache backend stores generated audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Bounded in-process map.
    #[default]
    Memory,
    /// One `.wav` file per fingerprint in [`CacheConfig::directory`].
    File,
}

/// Audio cache configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kind: CacheKind,
    /// Maximum number of cached clips. Default: 200.
    pub max_entries: usize,
    /// Root directory for the file backend. Default: `<cache dir>/bragi`.
    pub directory: PathBuf,
    /// Keep the cache across [`SpeechBroker::end_session`](crate::SpeechBroker::end_session).
    /// Default: false.
    pub persist_across_sessions: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            max_entries: 200,
            directory: default_cache_dir(),
            persist_across_sessions: false,
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the backend.
    pub fn kind(mut self, kind: CacheKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the maximum number of cached clips.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the file backend directory.
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = dir.into();
        self
    }

    /// Keep or drop cached audio at session boundaries.
    pub fn persist_across_sessions(mut self, persist: bool) -> Self {
        self.persist_across_sessions = persist;
        self
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("bragi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.api_url, "http://localhost:5000");
        assert_eq!(config.request_timeout_secs, 15);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay_duration(), Duration::from_millis(100));
        assert_eq!(config.max_simultaneous_generations, 1);
        assert_eq!(config.max_queued, 20);
        assert_eq!(config.cache.kind, CacheKind::Memory);
        assert!(!config.cache.persist_across_sessions);
    }

    #[test]
    fn parse_minimal_config() {
        let config = BrokerConfig::from_toml(r#"api_url = "http://tts:5000/""#).unwrap();
        assert_eq!(config.api_url, "http://tts:5000");
        assert_eq!(config.max_queued, 20);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            api_url = "http://tts:5000"
            api_key = "secret"
            request_timeout_secs = 30
            max_retries = 5
            retry_base_delay_ms = 250
            max_simultaneous_generations = 4
            max_queued = 40
            max_text_chars = 300
            probe_interval_ms = 5000

            [cache]
            kind = "file"
            max_entries = 1000
            directory = "/var/cache/bragi"
            persist_across_sessions = true
        "#;
        let config = BrokerConfig::from_toml(toml).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_simultaneous_generations, 4);
        assert_eq!(config.probe_interval_duration(), Duration::from_secs(5));
        assert_eq!(config.cache.kind, CacheKind::File);
        assert_eq!(config.cache.directory, PathBuf::from("/var/cache/bragi"));
        assert!(config.cache.persist_across_sessions);
    }

    #[test]
    fn empty_api_key_is_none() {
        let config = BrokerConfig::from_toml(r#"api_key = """#).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn unknown_cache_kind_is_rejected() {
        let result = BrokerConfig::from_toml("[cache]\nkind = \"redis\"");
        assert!(matches!(result, Err(BragiError::Configuration(_))));
    }

    #[test]
    fn zero_generation_slots_are_rejected() {
        let result = BrokerConfig::from_toml("max_simultaneous_generations = 0");
        let Err(BragiError::Configuration(msg)) = result else {
            panic!("expected configuration error, got {result:?}");
        };
        assert!(msg.contains("max_simultaneous_generations"));
    }

    #[test]
    fn zero_probe_interval_is_rejected() {
        let result = BrokerConfig::from_toml("probe_interval_ms = 0");
        assert!(matches!(result, Err(BragiError::Configuration(_))));
        assert!(
            BrokerConfig::default()
                .probe_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(BrokerConfig::default().validate().is_ok());
    }

    #[test]
    fn config_not_found_returns_error() {
        let err = BrokerConfig::load(Some(Path::new("/nonexistent/bragi.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }
}
