use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub honeypot: HoneypotConfig,
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

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/netvigil/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("netvigil/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the data directory holding rules, detections, and targets
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.data_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory for persisted rules, detections, and targets
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Trailing window for traffic statistics and rule evaluation (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Interval between published traffic snapshots (seconds)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Capacity of the subscriber broadcast channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            stats_interval_secs: default_stats_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoneypotConfig {
    /// Enable periodic liveness probing of configured targets
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between scan ticks
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    /// Maximum simultaneously in-flight probes
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-probe TCP connect timeout (milliseconds)
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HoneypotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_probe_interval(),
            concurrency: default_concurrency(),
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

// Default value functions
fn default_data_dir() -> String {
    "/var/lib/netvigil".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_window_secs() -> u64 {
    60
}

fn default_stats_interval() -> u64 {
    1
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> u64 {
    30
}

fn default_concurrency() -> usize {
    50
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.detector.window_secs, 60);
        assert_eq!(config.honeypot.concurrency, 50);
        assert_eq!(config.honeypot.timeout_ms, 2000);
        assert!(config.honeypot.enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.detector.window_secs, config.detector.window_secs);
        assert_eq!(parsed.general.data_dir, config.general.data_dir);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [honeypot]
            interval_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(parsed.honeypot.interval_secs, 10);
        assert_eq!(parsed.honeypot.concurrency, 50);
        assert_eq!(parsed.detector.window_secs, 60);
    }
}
