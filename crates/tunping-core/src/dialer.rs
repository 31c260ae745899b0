use crate::error::{Error, Result};
use crate::tunnel::{BoxedStream, Destination, TunnelInstance};
use std::sync::Arc;

/// Stream factory keyed by `(network, address)` that dials only through a tunnel.
#[derive(Clone)]
pub struct TunnelDialer {
    instance: Arc<TunnelInstance>,
}

impl TunnelDialer {
    /// Fails with [`Error::Configuration`] unless the instance has been started.
    pub fn new(instance: Arc<TunnelInstance>) -> Result<Self> {
        if !instance.is_running() {
            return Err(Error::Configuration("tunnel instance not running".into()));
        }
        Ok(Self { instance })
    }

    /// Dial `address` (`host:port`) over `network` (`tcp` or `udp`).
    pub async fn dial(&self, network: &str, address: &str) -> Result<BoxedStream> {
        let destination: Destination = format!("{}:{}", network, address).parse()?;
        self.instance.dial(&destination).await
    }
}
