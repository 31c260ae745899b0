//! Top-level measurement: start the tunnel, sample latency, look up the exit
//! country, encode.

use crate::client::{HttpProbe, ProbeClient};
use crate::config::ProbeConfig;
use crate::geo::GeolocationProbe;
use crate::latency::{LatencyAggregator, SampleObserver};
use crate::result::Measurement;
use crate::tunnel::{TunnelEnv, TunnelInstance, TunnelLauncher};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Optional hooks into a measurement run
#[derive(Default)]
pub struct MeasureHooks<'a> {
    /// Called after every latency sample
    pub observer: Option<&'a dyn SampleObserver>,
    /// Ends sampling early when a value is broadcast
    pub shutdown: Option<broadcast::Receiver<()>>,
}

/// Run one measurement and return the encoded result string.
pub async fn measure(
    launcher: &dyn TunnelLauncher,
    config_blob: &str,
    config: &ProbeConfig,
) -> String {
    run_measurement(launcher, config_blob, config, MeasureHooks::default())
        .await
        .to_string()
}

/// Like [`measure`], returning the structured result.
///
/// A tunnel that started is closed exactly once before this returns,
/// whichever way the measurement went.
pub async fn run_measurement(
    launcher: &dyn TunnelLauncher,
    config_blob: &str,
    config: &ProbeConfig,
    hooks: MeasureHooks<'_>,
) -> Measurement {
    let env = TunnelEnv {
        asset_dir: config.asset_dir.clone(),
    };
    let instance = match TunnelInstance::launch(launcher, &env, config_blob).await {
        Ok(instance) => Arc::new(instance),
        Err(e) => {
            warn!("tunnel failed to start: {}", e);
            return Measurement::fatal(e);
        }
    };

    let measurement = measure_delay(instance.clone(), config, hooks).await;
    instance.close();
    measurement
}

/// Measure over an already running tunnel.
pub async fn measure_delay(
    instance: Arc<TunnelInstance>,
    config: &ProbeConfig,
    hooks: MeasureHooks<'_>,
) -> Measurement {
    let client = match ProbeClient::new(instance, config.timeout()).await {
        Ok(client) => client,
        Err(e) => {
            warn!("probe client unavailable: {}", e);
            return Measurement::fatal(e);
        }
    };
    let measurement = measure_with_probe(&client, config, hooks).await;
    // relays must let go of their tunnel streams before the tunnel closes
    client.close().await;
    measurement
}

/// Sampling, geolocation and reduction over any [`HttpProbe`].
pub async fn measure_with_probe(
    probe: &dyn HttpProbe,
    config: &ProbeConfig,
    hooks: MeasureHooks<'_>,
) -> Measurement {
    let aggregator = LatencyAggregator::new(config.target_url.clone(), config.times);
    let outcome = aggregator
        .run(probe, hooks.observer.unwrap_or(&()), hooks.shutdown)
        .await;

    let country = if outcome.has_any_valid() && !outcome.cancelled {
        GeolocationProbe::new(config.geolocation_url.clone())
            .country(probe)
            .await
    } else {
        String::new()
    };

    let measurement = Measurement::from_outcome(outcome, country);
    info!(
        code = measurement.code(),
        country = measurement.country(),
        "measurement finished"
    );
    measurement
}
