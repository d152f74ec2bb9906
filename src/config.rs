//! Configuration loading for remotest.
//!
//! Configuration lives in a TOML file (`remotest.toml` by default) with an
//! `[org]` table for the platform connection and an optional `[run]` table
//! for wait/poll defaults. CLI flags override the file.
//!
//! The access token itself never goes in the file; the config names the
//! environment variable that carries it.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::orchestrator::RunOptions;
use crate::selection::SubmitMode;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub org: OrgConfig,
    #[serde(default)]
    pub run: RunDefaults,
}

/// Platform connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrgConfig {
    /// Instance base URL, e.g. `https://org.example.com`.
    pub instance_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub access_token_env: String,
}

/// Default run knobs, all overridable per invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    pub wait_secs: u64,
    pub poll_interval_secs: u64,
    pub stream_timeout_secs: u64,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            wait_secs: 14_400,
            poll_interval_secs: 3,
            stream_timeout_secs: 14_400,
        }
    }
}

impl RunDefaults {
    /// Materializes orchestrator options for the given submit mode.
    pub fn to_options(&self, mode: SubmitMode) -> RunOptions {
        RunOptions {
            mode,
            wait: Duration::from_secs(self.wait_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            stream_timeout: Duration::from_secs(self.stream_timeout_secs),
        }
    }
}

fn default_api_version() -> String {
    "61.0".to_string()
}

fn default_token_env() -> String {
    "REMOTEST_ACCESS_TOKEN".to_string()
}

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains invalid TOML, or
/// does not match the schema.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// Useful for testing or generating configuration programmatically.
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let config = load_config_str(
            r#"
            [org]
            instance_url = "https://org.example.com"
            api_version = "62.0"
            access_token_env = "MY_TOKEN"

            [run]
            wait_secs = 600
            poll_interval_secs = 5
            stream_timeout_secs = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.org.instance_url, "https://org.example.com");
        assert_eq!(config.org.api_version, "62.0");
        assert_eq!(config.run.wait_secs, 600);

        let options = config.run.to_options(SubmitMode::Asynchronous);
        assert_eq!(options.wait, Duration::from_secs(600));
        assert_eq!(options.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn run_table_and_version_default() {
        let config = load_config_str(
            r#"
            [org]
            instance_url = "https://org.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.org.api_version, "61.0");
        assert_eq!(config.org.access_token_env, "REMOTEST_ACCESS_TOKEN");
        assert_eq!(config.run.wait_secs, 14_400);
    }

    #[test]
    fn missing_org_table_is_an_error() {
        assert!(load_config_str("[run]\nwait_secs = 10").is_err());
    }

    #[test]
    fn load_config_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remotest.toml");
        std::fs::write(&path, "[org]\ninstance_url = \"https://org.example.com\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.org.instance_url, "https://org.example.com");

        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
