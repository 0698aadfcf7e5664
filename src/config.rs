//! Runner configuration.
//!
//! Built from defaults, then an optional JSON document (a `--config` file or
//! the `ZCODE_CONFIG` environment variable), then individual environment
//! variable overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::ai::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use crate::backend::piston::DEFAULT_PISTON_URL;
use crate::backend::JavaScriptLimits;

/// Top-level configuration for the runner.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Piston `execute` endpoint for non-JavaScript languages.
    #[serde(default = "default_piston_url")]
    pub piston_url: String,

    /// Per-request timeout for the execution service. No timeout if unset.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,

    /// Engine limits for the local JavaScript sandbox.
    #[serde(default)]
    pub javascript: JavaScriptLimits,

    /// AI challenge service settings (optional).
    #[serde(default)]
    pub gemini: Option<GeminiConfig>,

    /// Where the points total is stored.
    #[serde(default = "default_points_file")]
    pub points_file: PathBuf,
}

/// Gemini API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Delay before the single retry of a rate-limited call.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl GeminiConfig {
    fn with_api_key(api_key: String) -> Self {
        Self {
            api_key,
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_piston_url() -> String {
    DEFAULT_PISTON_URL.into()
}

fn default_points_file() -> PathBuf {
    ".zcode-points.json".into()
}

fn default_gemini_model() -> String {
    DEFAULT_GEMINI_MODEL.into()
}

fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.into()
}

const fn default_retry_delay_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            piston_url: default_piston_url(),
            request_timeout_seconds: None,
            javascript: JavaScriptLimits::default(),
            gemini: None,
            points_file: default_points_file(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file, `ZCODE_CONFIG`, and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("ZCODE_CONFIG") {
                Ok(json) => Self::from_json(&json).context("Failed to parse ZCODE_CONFIG")?,
                Err(_) => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid configuration JSON")?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`.
    ///
    /// Recognised keys: `PISTON_URL`, `GEMINI_API_KEY`, `GEMINI_MODEL`,
    /// `ZCODE_POINTS_FILE`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = get("PISTON_URL") {
            debug!(url = %url, "Execution service URL overridden");
            self.piston_url = url;
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            match self.gemini.as_mut() {
                Some(gemini) => gemini.api_key = key,
                None => self.gemini = Some(GeminiConfig::with_api_key(key)),
            }
        }
        if let (Some(model), Some(gemini)) = (get("GEMINI_MODEL"), self.gemini.as_mut()) {
            gemini.model = model;
        }
        if let Some(path) = get("ZCODE_POINTS_FILE") {
            self.points_file = path.into();
        }
    }

    /// Execution service timeout, if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_seconds.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.piston_url, DEFAULT_PISTON_URL);
        assert!(config.request_timeout().is_none());
        assert_eq!(config.javascript, JavaScriptLimits::default());
        assert!(config.gemini.is_none());
        assert_eq!(config.points_file, PathBuf::from(".zcode-points.json"));
    }

    #[test]
    fn parse_full_document() {
        let json = r#"{
            "piston_url": "http://localhost:2000/api/v2/execute",
            "request_timeout_seconds": 15,
            "javascript": { "loop_iteration_limit": 100000, "recursion_limit": 256 },
            "gemini": { "api_key": "abc", "retry_delay_ms": 10 },
            "points_file": "/tmp/points.json"
        }"#;

        let config = Config::from_json(json).unwrap();
        assert_eq!(config.piston_url, "http://localhost:2000/api/v2/execute");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.javascript.loop_iteration_limit, Some(100_000));
        assert_eq!(config.javascript.recursion_limit, Some(256));

        let gemini = config.gemini.as_ref().expect("gemini should be set");
        assert_eq!(gemini.api_key, "abc");
        assert_eq!(gemini.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(gemini.base_url, DEFAULT_GEMINI_BASE_URL);
        assert_eq!(gemini.retry_delay_ms, 10);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(Config::from_json("{ not json").is_err());
    }

    #[test]
    fn api_key_override_creates_gemini_section() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("GEMINI_API_KEY", "from-env"),
            ("GEMINI_MODEL", "gemini-pro"),
        ]));

        let gemini = config.gemini.unwrap();
        assert_eq!(gemini.api_key, "from-env");
        assert_eq!(gemini.model, "gemini-pro");
        assert_eq!(gemini.retry_delay_ms, 2000);
    }

    #[test]
    fn model_override_without_key_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[("GEMINI_MODEL", "gemini-pro")]));
        assert!(config.gemini.is_none());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::from_json(
            r#"{"piston_url": "http://file", "gemini": {"api_key": "file-key"}}"#,
        )
        .unwrap();
        config.apply_overrides(lookup(&[
            ("PISTON_URL", "http://env"),
            ("GEMINI_API_KEY", "env-key"),
            ("ZCODE_POINTS_FILE", "/var/lib/points.json"),
        ]));

        assert_eq!(config.piston_url, "http://env");
        assert_eq!(config.gemini.unwrap().api_key, "env-key");
        assert_eq!(config.points_file, PathBuf::from("/var/lib/points.json"));
    }

    #[test]
    fn empty_override_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[("PISTON_URL", ""), ("GEMINI_API_KEY", "")]));
        assert_eq!(config.piston_url, DEFAULT_PISTON_URL);
        assert!(config.gemini.is_none());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zcode.json");
        std::fs::write(&path, r#"{"request_timeout_seconds": 3}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::from_file(Path::new("/nonexistent/zcode.json")).is_err());
    }
}
