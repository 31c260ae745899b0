//! tunping - latency and exit-country probe through a proxy tunnel
//!
//! Re-exports the core library; the `ui` feature adds terminal helpers used
//! by the binary.

pub use tunping_core::{
    bridge, client, config, dialer, error, geo, latency, measure, result, tunnel,
};
pub use tunping_core::{
    init_logger, measure_delay, measure_with_probe, run_measurement, BuiltinLauncher,
    Destination, Error, GeolocationProbe, HttpProbe, LatencyAggregator, MeasureHooks,
    Measurement, ProbeClient, ProbeConfig, ProbeOutcome, ProbeSample, Result, SampleObserver,
    Tunnel, TunnelDialer, TunnelEnv, TunnelInstance, TunnelLauncher, PING_DELAY_ERROR,
    PING_DELAY_TIMEOUT,
};

#[cfg(feature = "ui")]
pub mod ui;
