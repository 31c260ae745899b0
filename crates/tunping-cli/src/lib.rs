//! tunping CLI - argument model and run loop for the `tunping` binary

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::info;
use tunping_core::{
    run_measurement, BuiltinLauncher, MeasureHooks, Measurement, ProbeConfig, SampleObserver,
};

/// Measure latency and exit country through a proxy tunnel
#[derive(Debug, Clone, Parser)]
#[command(name = "tunping", version, about)]
pub struct Cli {
    /// Tunnel configuration file, passed to the launcher verbatim
    #[arg(long)]
    pub tunnel: PathBuf,

    /// Probe settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Per-request timeout in seconds, 0 disables it
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Number of sequential samples
    #[arg(short = 'n', long)]
    pub times: Option<u32>,

    /// URL each sample requests
    #[arg(short, long)]
    pub url: Option<String>,

    /// Geolocation endpoint
    #[arg(long)]
    pub geo_url: Option<String>,

    /// Asset directory for the tunnel engine
    #[arg(long)]
    pub asset_dir: Option<PathBuf>,

    /// Print a JSON report instead of the encoded string
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// File settings first, then flags on top
    pub fn probe_config(&self) -> Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProbeConfig::default(),
        };
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(times) = self.times {
            config.times = times;
        }
        if let Some(url) = &self.url {
            config.target_url = url.clone();
        }
        if let Some(geo_url) = &self.geo_url {
            config.geolocation_url = geo_url.clone();
        }
        if let Some(dir) = &self.asset_dir {
            config.asset_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

/// Machine-readable form of one run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub encoded: String,
    pub code: u64,
    pub delay_ms: Option<u64>,
    pub country: String,
    pub last_error: String,
    pub measured_at: DateTime<Utc>,
}

impl From<&Measurement> for Report {
    fn from(measurement: &Measurement) -> Self {
        let delay_ms = match measurement {
            Measurement::Measured { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        };
        Self {
            encoded: measurement.to_string(),
            code: measurement.code(),
            delay_ms,
            country: measurement.country().to_string(),
            last_error: measurement.error().to_string(),
            measured_at: Utc::now(),
        }
    }
}

impl Report {
    /// Line printed to stdout
    pub fn render(&self, json: bool) -> Result<String> {
        if json {
            Ok(serde_json::to_string_pretty(self)?)
        } else {
            Ok(self.encoded.clone())
        }
    }
}

/// Read the tunnel blob and run one measurement with the built-in launcher.
pub async fn run(
    cli: &Cli,
    observer: Option<&dyn SampleObserver>,
    shutdown: Option<broadcast::Receiver<()>>,
) -> Result<Measurement> {
    let config = cli.probe_config()?;
    let blob = fs::read_to_string(&cli.tunnel)
        .with_context(|| format!("reading tunnel config {}", cli.tunnel.display()))?;

    info!(
        "probing {} x{} (timeout {}s)",
        config.target_url, config.times, config.timeout_secs
    );
    let hooks = MeasureHooks { observer, shutdown };
    Ok(run_measurement(&BuiltinLauncher, &blob, &config, hooks).await)
}
