use crate::error::{Error, Result};
use crate::geo::DEFAULT_GEOLOCATION_URL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Per-request timeout in seconds, 0 disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// URL every latency sample requests
    #[serde(default = "default_target_url")]
    pub target_url: String,
    /// Number of sequential samples
    #[serde(default = "default_times")]
    pub times: u32,
    /// Country lookup endpoint
    #[serde(default = "default_geolocation_url")]
    pub geolocation_url: String,
    /// Asset directory handed to the tunnel launcher
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 { 5 }
fn default_target_url() -> String { "https://www.google.com/generate_204".to_string() }
fn default_times() -> u32 { 3 }
fn default_geolocation_url() -> String { DEFAULT_GEOLOCATION_URL.to_string() }

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            target_url: default_target_url(),
            times: default_times(),
            geolocation_url: default_geolocation_url(),
            asset_dir: None,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            warn!("cannot read config file {}: {}", path.display(), e);
            Error::Configuration(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        info!("loaded probe config from {}", path.display());
        Ok(config)
    }

    /// Save as pretty TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
