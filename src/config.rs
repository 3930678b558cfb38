use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::detection::DetectionConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub detection: DetectionConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from AUTHSIFT_CONFIG or ./authsift.toml, or fall back to
    /// defaults, then apply environment overrides.
    pub fn load_or_default() -> Result<Self> {
        let mut config = match std::env::var("AUTHSIFT_CONFIG") {
            Ok(path) => Self::load(path)?,
            Err(_) => {
                let local = PathBuf::from("authsift.toml");
                if local.exists() {
                    Self::load(local)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment-variable overrides for the operational paths and
    /// the detector thresholds.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("AUTHSIFT_RUNS_DIR") {
            self.paths.runs_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("AUTHSIFT_MAPPINGS") {
            self.paths.mappings = PathBuf::from(path);
        }
        if let Some(port) = env_parse("AUTHSIFT_PORT") {
            self.server.port = port;
        }
        if let Some(secs) = env_parse("WINDOW_SECONDS") {
            self.detection.window_seconds = secs;
        }
        if let Some(n) = env_parse("BRUTE_FORCE_FAILURE_THRESHOLD") {
            self.detection.brute_force_failure_threshold = n;
        }
        if let Some(n) = env_parse("CRED_ABUSE_DISTINCT_USER_THRESHOLD") {
            self.detection.cred_abuse_distinct_user_threshold = n;
        }
        if let Some(n) = env_parse("CRED_ABUSE_FAILURE_THRESHOLD") {
            self.detection.cred_abuse_failure_threshold = n;
        }
    }

    /// Path to the incident registry file.
    pub fn registry_path(&self) -> PathBuf {
        self.paths.runs_dir.join("incidents.json")
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding run artifacts and the incident registry
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,

    /// Field-mapping profile file
    #[serde(default = "default_mappings")]
    pub mappings: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            runs_dir: default_runs_dir(),
            mappings: default_mappings(),
        }
    }
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("runs")
}

fn default_mappings() -> PathBuf {
    PathBuf::from("config/field_mappings.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.paths.runs_dir, PathBuf::from("runs"));
        assert_eq!(config.detection.window_seconds, 60);
        assert_eq!(config.detection.brute_force_failure_threshold, 5);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(
            parsed.detection.cred_abuse_failure_threshold,
            config.detection.cred_abuse_failure_threshold
        );
    }

    #[test]
    fn test_registry_path() {
        let config = Config::default();
        assert_eq!(config.registry_path(), PathBuf::from("runs/incidents.json"));
    }
}
