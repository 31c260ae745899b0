use super::{BoxedStream, Destination, Host, Network, Tunnel, TunnelEnv, TunnelLauncher};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Configuration blob understood by [`BuiltinLauncher`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub outbound: OutboundConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundProtocol {
    Direct,
    Socks5,
}

/// A single outbound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    pub protocol: OutboundProtocol,
    /// Upstream server address, required for `socks5`
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_socks_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_socks_port() -> u16 {
    1080
}

impl TunnelConfig {
    pub fn parse(blob: &str) -> Result<Self> {
        Ok(toml::from_str(blob)?)
    }
}

/// Launches the minimal engines shipped with tunping: `direct` and `socks5`.
#[derive(Debug, Clone, Default)]
pub struct BuiltinLauncher;

#[async_trait]
impl TunnelLauncher for BuiltinLauncher {
    async fn launch(&self, env: &TunnelEnv, config: &str) -> Result<Box<dyn Tunnel>> {
        if let Some(dir) = &env.asset_dir {
            if !dir.is_dir() {
                return Err(Error::Configuration(format!(
                    "asset directory {} does not exist",
                    dir.display()
                )));
            }
            debug!("using asset directory {}", dir.display());
        }

        let config = TunnelConfig::parse(config)?;
        let outbound = config.outbound;
        match outbound.protocol {
            OutboundProtocol::Direct => Ok(Box::new(DirectTunnel)),
            OutboundProtocol::Socks5 => {
                let address = outbound.address.ok_or_else(|| {
                    Error::Configuration("socks5 outbound requires an address".into())
                })?;
                let credentials = match (outbound.username, outbound.password) {
                    (Some(user), Some(pass)) => Some((user, pass)),
                    (None, None) => None,
                    _ => {
                        return Err(Error::Configuration(
                            "socks5 username and password must be set together".into(),
                        ))
                    }
                };
                Ok(Box::new(Socks5Tunnel {
                    server: format!("{}:{}", address, outbound.port),
                    credentials,
                    resolved: OnceCell::new(),
                }))
            }
        }
    }
}

fn require_tcp(destination: &Destination) -> Result<()> {
    if destination.network != Network::Tcp {
        return Err(Error::Dial {
            destination: destination.to_string(),
            reason: "only tcp is supported".into(),
        });
    }
    Ok(())
}

/// Connects straight to the destination
struct DirectTunnel;

#[async_trait]
impl Tunnel for DirectTunnel {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn dial(&self, destination: &Destination) -> Result<BoxedStream> {
        require_tcp(destination)?;
        let stream = TcpStream::connect(destination.authority())
            .await
            .map_err(|e| Error::Dial {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }

    fn close(&self) {}
}

/// Relays every connection through an upstream SOCKS5 server
struct Socks5Tunnel {
    server: String,
    credentials: Option<(String, String)>,
    resolved: OnceCell<SocketAddr>,
}

#[async_trait]
impl Tunnel for Socks5Tunnel {
    async fn start(&self) -> Result<()> {
        let addr = tokio::net::lookup_host(&self.server)
            .await?
            .next()
            .ok_or_else(|| Error::TunnelStart(format!("no address for {}", self.server)))?;
        let _ = self.resolved.set(addr);
        info!("socks5 upstream {} resolved to {}", self.server, addr);
        Ok(())
    }

    async fn dial(&self, destination: &Destination) -> Result<BoxedStream> {
        require_tcp(destination)?;
        let server = self
            .resolved
            .get()
            .copied()
            .ok_or_else(|| Error::Configuration("socks5 upstream not started".into()))?;

        let dial_err = |reason: String| Error::Dial {
            destination: destination.to_string(),
            reason,
        };
        let mut upstream = TcpStream::connect(server)
            .await
            .map_err(|e| dial_err(format!("upstream {}: {}", server, e)))?;
        let credentials = self
            .credentials
            .as_ref()
            .map(|(user, pass)| (user.as_str(), pass.as_str()));
        socks5_connect(&mut upstream, destination, credentials)
            .await
            .map_err(|e| dial_err(e.to_string()))?;
        Ok(Box::new(upstream))
    }

    fn close(&self) {}
}

/// Client side of a SOCKS5 CONNECT (RFC 1928, with RFC 1929 credentials when given).
pub(crate) async fn socks5_connect<S>(
    stream: &mut S,
    destination: &Destination,
    credentials: Option<(&str, &str)>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use std::io::{Error as IoError, ErrorKind};

    // method negotiation
    let method = if credentials.is_some() { 0x02 } else { 0x00 };
    stream.write_all(&[0x05, 0x01, method]).await?;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x05 || reply[1] != method {
        return Err(IoError::new(
            ErrorKind::PermissionDenied,
            "upstream rejected authentication method",
        ));
    }

    if let Some((user, pass)) = credentials {
        if user.len() > 255 || pass.len() > 255 {
            return Err(IoError::new(ErrorKind::InvalidInput, "credentials too long"));
        }
        let mut auth = vec![0x01, user.len() as u8];
        auth.extend_from_slice(user.as_bytes());
        auth.push(pass.len() as u8);
        auth.extend_from_slice(pass.as_bytes());
        stream.write_all(&auth).await?;
        let mut status = [0u8; 2];
        stream.read_exact(&mut status).await?;
        if status[1] != 0x00 {
            return Err(IoError::new(
                ErrorKind::PermissionDenied,
                "upstream rejected credentials",
            ));
        }
    }

    // CONNECT request
    let mut request = vec![0x05, 0x01, 0x00];
    match &destination.host {
        Host::Ip(IpAddr::V4(ip)) => {
            request.push(0x01);
            request.extend_from_slice(&ip.octets());
        }
        Host::Ip(IpAddr::V6(ip)) => {
            request.push(0x04);
            request.extend_from_slice(&ip.octets());
        }
        Host::Domain(name) => {
            if name.len() > 255 {
                return Err(IoError::new(ErrorKind::InvalidInput, "domain too long"));
            }
            request.push(0x03);
            request.push(name.len() as u8);
            request.extend_from_slice(name.as_bytes());
        }
    }
    request.extend_from_slice(&destination.port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(IoError::new(
            ErrorKind::ConnectionRefused,
            format!("upstream CONNECT failed with code {}", head[1]),
        ));
    }

    // skip bound address and port
    let skip = match head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => stream.read_u8().await? as usize,
        other => {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("unsupported address type {}", other),
            ))
        }
    };
    let mut bound = vec![0u8; skip + 2];
    stream.read_exact(&mut bound).await?;
    Ok(())
}
