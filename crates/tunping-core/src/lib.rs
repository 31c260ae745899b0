//! tunping core - latency and exit-country probing through a proxy tunnel
//!
//! A tunnel instance is started from an opaque config blob, an HTTP client is
//! wired to dial only through it, a fixed number of timed GETs are folded into
//! one result, and the outcome is encoded as a `:`-delimited string.

pub mod bridge;
pub mod client;
pub mod config;
pub mod dialer;
pub mod error;
pub mod geo;
pub mod latency;
pub mod measure;
pub mod result;
pub mod tunnel;

pub use client::{HttpProbe, ProbeClient};
pub use config::ProbeConfig;
pub use dialer::TunnelDialer;
pub use error::{Error, Result};
pub use geo::{GeoLocation, GeolocationProbe, DEFAULT_GEOLOCATION_URL};
pub use latency::{LatencyAggregator, ProbeOutcome, ProbeSample, SampleObserver};
pub use measure::{measure, measure_delay, measure_with_probe, run_measurement, MeasureHooks};
pub use result::{Measurement, PING_DELAY_ERROR, PING_DELAY_TIMEOUT};
pub use tunnel::{
    BoxedStream, BuiltinLauncher, Destination, Host, Network, Tunnel, TunnelEnv, TunnelInstance,
    TunnelLauncher,
};

/// Initialize the logger with default settings
pub fn init_logger() {
    use tracing_subscriber::{fmt, EnvFilter};

    // stdout carries the encoded result
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
