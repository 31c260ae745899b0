//! The tunnel collaborator: anything that can start, dial outbound connections and close.
//!
//! Measurement code only ever sees a [`TunnelInstance`], which guards the
//! `Created -> Running -> Closed` lifecycle around a boxed [`Tunnel`].

mod builtin;
mod destination;

pub use builtin::{BuiltinLauncher, OutboundConfig, OutboundProtocol, TunnelConfig};
pub use destination::{Destination, Host, Network};

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// A bidirectional byte stream opened through a tunnel
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelStream for T {}

pub type BoxedStream = Box<dyn TunnelStream>;

/// A proxy engine able to originate outbound connections
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Bring the engine up. Called once before any dial.
    async fn start(&self) -> Result<()>;

    /// Open one outbound connection. Ownership of the stream passes to the caller.
    async fn dial(&self, destination: &Destination) -> Result<BoxedStream>;

    /// Release everything the engine holds.
    fn close(&self);
}

/// One-time environment handed to a launcher, in place of process-wide setup
#[derive(Debug, Clone, Default)]
pub struct TunnelEnv {
    /// Directory holding routing assets (geo databases and the like)
    pub asset_dir: Option<PathBuf>,
}

/// Builds a tunnel from an opaque configuration blob
#[async_trait]
pub trait TunnelLauncher: Send + Sync {
    async fn launch(&self, env: &TunnelEnv, config: &str) -> Result<Box<dyn Tunnel>>;
}

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle guard around a launched tunnel.
///
/// `close` runs at most once, and only if `start` succeeded. Dropping a
/// running instance closes it.
pub struct TunnelInstance {
    inner: Box<dyn Tunnel>,
    state: AtomicU8,
}

impl TunnelInstance {
    pub fn new(inner: Box<dyn Tunnel>) -> Self {
        Self {
            inner,
            state: AtomicU8::new(CREATED),
        }
    }

    /// Launch and start in one go, mapping both failures to [`Error::TunnelStart`].
    pub async fn launch(
        launcher: &dyn TunnelLauncher,
        env: &TunnelEnv,
        config: &str,
    ) -> Result<Self> {
        let tunnel = launcher
            .launch(env, config)
            .await
            .map_err(|e| Error::TunnelStart(e.to_string()))?;
        let instance = Self::new(tunnel);
        instance.start().await?;
        Ok(instance)
    }

    pub async fn start(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) != CREATED {
            return Err(Error::TunnelStart("tunnel instance already started".into()));
        }
        self.inner
            .start()
            .await
            .map_err(|e| Error::TunnelStart(e.to_string()))?;
        self.state.store(RUNNING, Ordering::Release);
        info!("tunnel instance started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub async fn dial(&self, destination: &Destination) -> Result<BoxedStream> {
        if !self.is_running() {
            return Err(Error::Configuration("tunnel instance not running".into()));
        }
        debug!(%destination, "dialing through tunnel");
        self.inner.dial(destination).await
    }

    pub fn close(&self) {
        if self
            .state
            .compare_exchange(RUNNING, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.close();
            info!("tunnel instance closed");
        }
    }
}

impl Drop for TunnelInstance {
    fn drop(&mut self) {
        self.close();
    }
}
