use crate::bridge::Bridge;
use crate::dialer::TunnelDialer;
use crate::error::{error_chain, Error, Result};
use crate::latency::ProbeSample;
use crate::tunnel::TunnelInstance;
use async_trait::async_trait;
use reqwest::Proxy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// What the latency loop and the geolocation lookup need from an HTTP client
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// One timed GET. Any response counts; only transport failures and timeouts
    /// do not.
    async fn ping(&self, url: &str) -> ProbeSample;

    /// GET `url` and return the raw body.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Short-lived HTTP client whose only way out is the tunnel.
///
/// Keep-alive pooling is disabled so every request dials a fresh tunnel
/// connection, and `timeout` bounds the whole round trip.
pub struct ProbeClient {
    client: reqwest::Client,
    bridge: Bridge,
}

impl ProbeClient {
    /// `timeout` of zero disables the per-request timeout.
    pub async fn new(instance: Arc<TunnelInstance>, timeout: Duration) -> Result<Self> {
        let dialer =
            TunnelDialer::new(instance).map_err(|e| Error::ClientConstruction(e.to_string()))?;
        let bridge = Bridge::start(dialer)
            .await
            .map_err(|e| Error::ClientConstruction(format!("socks bridge: {}", e)))?;
        let proxy = Proxy::all(bridge.proxy_url())
            .map_err(|e| Error::ClientConstruction(error_chain(&e)))?;

        let mut builder = reqwest::Client::builder()
            .proxy(proxy)
            .pool_max_idle_per_host(0);
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::ClientConstruction(error_chain(&e)))?;

        debug!(
            "probe client ready via {} (timeout {:?})",
            bridge.local_addr(),
            timeout
        );
        Ok(Self { client, bridge })
    }

    /// Drop the HTTP client and wait until no tunnel stream is held anymore.
    pub async fn close(self) {
        let Self { client, bridge } = self;
        drop(client);
        bridge.shutdown().await;
    }

    /// Message for a failed request. When the tunnel refused the connection
    /// its own reason replaces the proxy-level chain reqwest reports. The slot
    /// is emptied before each request, so a stored reason belongs to this one.
    fn failure(&self, e: &reqwest::Error) -> String {
        match self.bridge.dial_errors().take() {
            Some(reason) => format!("{}: {}", e, reason),
            None => error_chain(e),
        }
    }
}

#[async_trait]
impl HttpProbe for ProbeClient {
    async fn ping(&self, url: &str) -> ProbeSample {
        self.bridge.dial_errors().take();
        let start = Instant::now();
        match self.client.get(url).send().await {
            Ok(_) => ProbeSample::Delay(start.elapsed().as_millis() as u64),
            Err(e) => ProbeSample::Timeout(self.failure(&e)),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.bridge.dial_errors().take();
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Err(Error::Request(self.failure(&e))),
        };
        Ok(response.bytes().await?.to_vec())
    }
}
