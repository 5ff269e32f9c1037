//! Configuration system (layered: code > env > config file).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfabError, Result};

pub const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const ENV_API_KEY: &str = "CONFAB_API_KEY";
const ENV_BASE_URL: &str = "CONFAB_BASE_URL";
const ENV_TIMEOUT_SECS: &str = "CONFAB_TIMEOUT_SECS";
const ENV_MODEL: &str = "CONFAB_MODEL";
pub(crate) const ENV_MAX_ROUNDS: &str = "CONFAB_MAX_ROUNDS";

/// Resolved client configuration.
///
/// Resolution order, highest first:
/// 1. Values set in code (`with_*`)
/// 2. Environment variables (`CONFAB_*`, `.env` honored)
/// 3. The TOML config file (`~/.confab/config.toml` by default)
#[derive(Clone, Default, PartialEq)]
pub struct ConfabConfig {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    model: Option<String>,
    max_rounds: Option<usize>,
}

impl std::fmt::Debug for ConfabConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfabConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("model", &self.model)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    model: Option<String>,
    max_rounds: Option<usize>,
}

impl ConfabConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the default config file (if present), then apply the environment.
    pub fn load() -> Result<Self> {
        let base = match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::new(),
        };
        let _ = dotenvy::dotenv();
        Ok(base.apply_env(|key| std::env::var(key).ok()))
    }

    /// Load from environment variables only.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::new().apply_env(|key| std::env::var(key).ok())
    }

    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw).map_err(|e| {
            ConfabError::Configuration(format!("invalid config file {}: {e}", path.display()))
        })?;
        Ok(Self {
            api_key: file.api_key,
            base_url: file.base_url,
            timeout_secs: file.timeout_secs,
            model: file.model,
            max_rounds: file.max_rounds.filter(|&n| n > 0),
        })
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = Some(url);
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS).and_then(|v| parse_positive(&v)) {
            self.timeout_secs = Some(secs as u64);
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            self.model = Some(model);
        }
        if let Some(rounds) = lookup(ENV_MAX_ROUNDS).and_then(|v| parse_positive(&v)) {
            self.max_rounds = Some(rounds);
        }
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn max_rounds(&self) -> Option<usize> {
        self.max_rounds
    }
}

/// `~/.confab/config.toml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".confab").join("config.toml"))
}

pub(crate) fn parse_positive(value: &str) -> Option<usize> {
    let parsed = value.trim().parse::<usize>().ok()?;
    if parsed == 0 {
        None
    } else {
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ConfabConfig::new();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.timeout_secs(), DEFAULT_TIMEOUT_SECS);
        assert!(config.api_key().is_none());
        assert!(config.max_rounds().is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        writeln!(
            file,
            "api_key = \"file-key\"\nmodel = \"file-model\"\nmax_rounds = 5"
        )
        .expect("config should be written");

        let config = ConfabConfig::from_file(file.path())
            .expect("config file should parse")
            .apply_env(env(&[("CONFAB_MODEL", "env-model"), ("CONFAB_MAX_ROUNDS", "0")]));

        assert_eq!(config.api_key(), Some("file-key"));
        assert_eq!(config.model(), Some("env-model"));
        // zero is ignored, file value stays
        assert_eq!(config.max_rounds(), Some(5));
    }

    #[test]
    fn code_overrides_env() {
        let config = ConfabConfig::new()
            .apply_env(env(&[("CONFAB_BASE_URL", "http://env"), ("CONFAB_TIMEOUT_SECS", "9")]))
            .with_base_url("http://code");
        assert_eq!(config.base_url(), "http://code");
        assert_eq!(config.timeout_secs(), 9);
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        writeln!(file, "max_rounds = \"many\"").expect("config should be written");
        let err = ConfabConfig::from_file(file.path()).expect_err("bad file should fail");
        assert!(matches!(err, ConfabError::Configuration(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = ConfabConfig::new().with_api_key("sk-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
    }
}
