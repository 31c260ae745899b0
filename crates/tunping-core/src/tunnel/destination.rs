use crate::error::{Error, Result};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Transport of an outbound connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Udp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Udp => write!(f, "udp"),
        }
    }
}

/// Destination host, either a literal IP or a name left for the tunnel to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{}]", ip),
            Host::Ip(ip) => write!(f, "{}", ip),
            Host::Domain(name) => write!(f, "{}", name),
        }
    }
}

/// Where a tunnel should open its outbound connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub network: Network,
    pub host: Host,
    pub port: u16,
}

impl Destination {
    pub fn tcp(host: Host, port: u16) -> Self {
        Self {
            network: Network::Tcp,
            host,
            port,
        }
    }

    /// `host:port` with IPv6 hosts bracketed, as accepted by `TcpStream::connect`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.authority())
    }
}

impl FromStr for Destination {
    type Err = Error;

    /// Parses `[tcp:|udp:]host:port`. Without a prefix the network is TCP.
    fn from_str(input: &str) -> Result<Self> {
        let (network, rest) = if let Some(rest) = input.strip_prefix("tcp:") {
            (Network::Tcp, rest)
        } else if let Some(rest) = input.strip_prefix("udp:") {
            (Network::Udp, rest)
        } else {
            (Network::Tcp, input)
        };

        let bracketed = rest.starts_with('[');
        let (host, port) = if bracketed {
            let (ip, tail) = rest[1..]
                .split_once(']')
                .ok_or_else(|| Error::address(input, "unterminated IPv6 literal"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| Error::address(input, "missing port"))?;
            (ip, port)
        } else {
            rest.rsplit_once(':')
                .ok_or_else(|| Error::address(input, "missing port"))?
        };

        if host.is_empty() {
            return Err(Error::address(input, "empty host"));
        }
        if !bracketed && host.contains(':') {
            return Err(Error::address(input, "IPv6 host must be bracketed"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::address(input, format!("invalid port {:?}", port)))?;

        let host = match host.parse::<IpAddr>() {
            Ok(ip) => Host::Ip(ip),
            Err(_) if bracketed => return Err(Error::address(input, "invalid IPv6 literal")),
            Err(_) => Host::Domain(host.to_string()),
        };

        Ok(Self { network, host, port })
    }
}
