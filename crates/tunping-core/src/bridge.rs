//! Loopback SOCKS5 listener that hands every CONNECT to a [`TunnelDialer`].
//!
//! The HTTP client is pointed at this listener with a `socks5h://` proxy URL,
//! which makes the tunnel its only way out. SOCKS replies carry no text, so
//! the reason of a failed tunnel dial is parked in a [`DialErrors`] slot for
//! the client to pick up.

use crate::dialer::TunnelDialer;
use anyhow::Result;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Most recent tunnel dial failure seen by a bridge
#[derive(Debug, Clone, Default)]
pub struct DialErrors {
    last: Arc<Mutex<Option<String>>>,
}

impl DialErrors {
    pub fn record(&self, reason: String) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(reason);
        }
    }

    /// Removes and returns the stored reason.
    pub fn take(&self) -> Option<String> {
        self.last.lock().ok().and_then(|mut last| last.take())
    }
}

/// Running bridge. [`Bridge::shutdown`] stops the listener and waits for every
/// relay it spawned; dropping it aborts them instead.
pub struct Bridge {
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    accept_task: Option<JoinHandle<()>>,
    dial_errors: DialErrors,
}

impl Bridge {
    /// Bind on `127.0.0.1:0` and start accepting.
    pub async fn start(dialer: TunnelDialer) -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);
        let dial_errors = DialErrors::default();

        let accept_task = tokio::spawn(Self::run_with_shutdown(
            listener,
            dialer,
            dial_errors.clone(),
            shutdown.subscribe(),
        ));
        debug!("socks bridge listening on {}", local_addr);

        Ok(Self {
            local_addr,
            shutdown,
            accept_task: Some(accept_task),
            dial_errors,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Proxy URL for reqwest. `socks5h` keeps name resolution on the tunnel side.
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}", self.local_addr)
    }

    pub fn dial_errors(&self) -> &DialErrors {
        &self.dial_errors
    }

    /// Stop accepting and wait until every relay has dropped its tunnel stream.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(accept_task) = self.accept_task.take() {
            if let Err(e) = accept_task.await {
                warn!("socks bridge task failed: {}", e);
            }
        }
    }

    async fn run_with_shutdown(
        listener: TcpListener,
        dialer: TunnelDialer,
        dial_errors: DialErrors,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut relays = JoinSet::new();
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let dialer = dialer.clone();
                            let dial_errors = dial_errors.clone();
                            let mut shutdown_clone = shutdown.resubscribe();
                            relays.spawn(async move {
                                tokio::select! {
                                    conn_result = Self::handle_connection(
                                        stream,
                                        &dialer,
                                        &dial_errors,
                                    ) => {
                                        if let Err(e) = conn_result {
                                            debug!(
                                                "bridge connection from {} ended: {}",
                                                client_addr, e
                                            );
                                        }
                                    },
                                    _ = shutdown_clone.recv() => {}
                                }
                            });
                        }
                        Err(e) => {
                            warn!("bridge accept failed: {}", e);
                        }
                    }
                },
                Some(_) = relays.join_next(), if !relays.is_empty() => {},
                _ = shutdown.recv() => {
                    debug!("socks bridge stopping");
                    break;
                }
            }
        }

        // relays already saw the shutdown broadcast
        while relays.join_next().await.is_some() {}
    }

    async fn handle_connection(
        mut inbound: TcpStream,
        dialer: &TunnelDialer,
        dial_errors: &DialErrors,
    ) -> Result<()> {
        let target = match read_connect_request(&mut inbound).await? {
            Ok(target) => target,
            Err(code) => {
                write_reply(&mut inbound, code).await?;
                return Err(anyhow::anyhow!("rejected request with code {}", code));
            }
        };

        let mut upstream = match dialer.dial("tcp", &target).await {
            Ok(stream) => stream,
            Err(e) => {
                // stored before the reply so the client sees it with the failure
                dial_errors.record(e.to_string());
                write_reply(&mut inbound, REPLY_GENERAL_FAILURE).await?;
                return Err(e.into());
            }
        };
        write_reply(&mut inbound, REPLY_SUCCEEDED).await?;

        let (sent, received) = tokio::io::copy_bidirectional(&mut inbound, &mut upstream).await?;
        debug!(target = %target, sent, received, "relay closed");
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        // dropping the relay JoinSet with the task aborts every relay
        if let Some(accept_task) = self.accept_task.take() {
            accept_task.abort();
        }
    }
}

/// Server side of the SOCKS5 greeting and request. The outer `Result` carries
/// I/O failures; the inner one a reply code to send back before hanging up.
async fn read_connect_request<S>(
    stream: &mut S,
) -> std::io::Result<std::result::Result<String, u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // 1. method negotiation
    let mut method_selection = [0u8; 2];
    stream.read_exact(&mut method_selection).await?;
    if method_selection[0] != 0x05 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unsupported SOCKS version",
        ));
    }
    let mut methods = vec![0u8; method_selection[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&0x00) {
        stream.write_all(&[0x05, 0xff]).await?;
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "client offered no acceptable method",
        ));
    }
    stream.write_all(&[0x05, 0x00]).await?;

    // 2. request header
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != 0x05 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unsupported SOCKS version",
        ));
    }
    let command = head[1];

    // 3. target address
    let host = match head[3] {
        0x01 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        0x03 => {
            let len = stream.read_u8().await? as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            match String::from_utf8(domain) {
                Ok(domain) => domain,
                Err(_) => return Ok(Err(REPLY_ADDRESS_NOT_SUPPORTED)),
            }
        }
        0x04 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            format!("[{}]", Ipv6Addr::from(addr))
        }
        _ => return Ok(Err(REPLY_ADDRESS_NOT_SUPPORTED)),
    };
    let port = stream.read_u16().await?;

    if command != 0x01 {
        return Ok(Err(REPLY_COMMAND_NOT_SUPPORTED));
    }
    Ok(Ok(format!("{}:{}", host, port)))
}

async fn write_reply<S>(stream: &mut S, code: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[0x05, code, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CoreResult;
    use crate::tunnel::{BoxedStream, Destination, Tunnel, TunnelInstance};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn reads_domain_connect() {
        let mut request = vec![0x05, 0x01, 0x00, 0x03, 8];
        request.extend_from_slice(b"ident.me");
        request.extend_from_slice(&443u16.to_be_bytes());
        let mut stream = Builder::new()
            .read(&[0x05, 0x01, 0x00])
            .write(&[0x05, 0x00])
            .read(&request)
            .build();
        let target = read_connect_request(&mut stream).await.unwrap();
        assert_eq!(target, Ok("ident.me:443".to_string()));
    }

    #[tokio::test]
    async fn reads_ipv6_connect() {
        let mut request = vec![0x05, 0x01, 0x00, 0x04];
        request.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        request.extend_from_slice(&8080u16.to_be_bytes());
        let mut stream = Builder::new()
            .read(&[0x05, 0x01, 0x00])
            .write(&[0x05, 0x00])
            .read(&request)
            .build();
        let target = read_connect_request(&mut stream).await.unwrap();
        assert_eq!(target, Ok("[::1]:8080".to_string()));
    }

    #[tokio::test]
    async fn refuses_udp_associate() {
        let mut stream = Builder::new()
            .read(&[0x05, 0x01, 0x00])
            .write(&[0x05, 0x00])
            .read(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .build();
        let target = read_connect_request(&mut stream).await.unwrap();
        assert_eq!(target, Err(REPLY_COMMAND_NOT_SUPPORTED));
    }

    /// Every dial lands on one end of an in-memory pipe that echoes back.
    struct EchoTunnel;

    #[async_trait]
    impl Tunnel for EchoTunnel {
        async fn start(&self) -> CoreResult<()> {
            Ok(())
        }

        async fn dial(&self, _destination: &Destination) -> CoreResult<BoxedStream> {
            let (client, mut server) = tokio::io::duplex(1024);
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                while let Ok(n) = server.read(&mut buf).await {
                    if n == 0 || server.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
            Ok(Box::new(client))
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn relays_through_tunnel() {
        let instance = Arc::new(TunnelInstance::new(Box::new(EchoTunnel)));
        instance.start().await.unwrap();
        let bridge = Bridge::start(TunnelDialer::new(instance).unwrap()).await.unwrap();

        let mut client = TcpStream::connect(bridge.local_addr()).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [0x05, 0x00]);

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_SUCCEEDED);

        client.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");
    }

    async fn connect_through(bridge: &Bridge) -> (TcpStream, u8) {
        let mut client = TcpStream::connect(bridge.local_addr()).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        (client, reply[1])
    }

    struct Unreachable;

    #[async_trait]
    impl Tunnel for Unreachable {
        async fn start(&self) -> CoreResult<()> {
            Ok(())
        }

        async fn dial(&self, destination: &Destination) -> CoreResult<BoxedStream> {
            Err(crate::error::Error::Dial {
                destination: destination.to_string(),
                reason: "no route to exit".into(),
            })
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn failed_dial_reason_is_kept() {
        let instance = Arc::new(TunnelInstance::new(Box::new(Unreachable)));
        instance.start().await.unwrap();
        let bridge = Bridge::start(TunnelDialer::new(instance).unwrap()).await.unwrap();

        let (_client, code) = connect_through(&bridge).await;
        assert_eq!(code, REPLY_GENERAL_FAILURE);
        let reason = bridge.dial_errors().take().unwrap();
        assert_eq!(reason, "dial tcp:10.0.0.1:80 failed: no route to exit");
        assert!(bridge.dial_errors().take().is_none());
    }

    /// Keeps the far end of every dialed pipe so tests can watch it close.
    #[derive(Default)]
    struct Parked {
        far_ends: Arc<std::sync::Mutex<Vec<tokio::io::DuplexStream>>>,
    }

    #[async_trait]
    impl Tunnel for Parked {
        async fn start(&self) -> CoreResult<()> {
            Ok(())
        }

        async fn dial(&self, _destination: &Destination) -> CoreResult<BoxedStream> {
            let (near, far) = tokio::io::duplex(64);
            self.far_ends.lock().unwrap().push(far);
            Ok(Box::new(near))
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn shutdown_waits_for_relays() {
        let tunnel = Parked::default();
        let far_ends = tunnel.far_ends.clone();
        let instance = Arc::new(TunnelInstance::new(Box::new(tunnel)));
        instance.start().await.unwrap();
        let bridge = Bridge::start(TunnelDialer::new(instance).unwrap()).await.unwrap();

        // the client side stays open, so only shutdown can end the relay
        let (_client, code) = connect_through(&bridge).await;
        assert_eq!(code, REPLY_SUCCEEDED);
        bridge.shutdown().await;

        let mut far = far_ends.lock().unwrap().pop().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(far.read(&mut buf).await.unwrap(), 0);
    }
}
