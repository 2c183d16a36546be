//! Remote endpoint addressing: a hostname plus a service name or port.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Port half of an [`Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Port {
    /// Well-known service name such as `https`.
    Service(String),
    Number(u16),
}

impl Port {
    /// Numeric port, resolving well-known service names.
    pub fn number(&self) -> io::Result<u16> {
        match self {
            Port::Number(n) => Ok(*n),
            Port::Service(name) => service_port(name).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown service name {name:?}"),
                )
            }),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Service(name) => f.write_str(name),
            Port::Number(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for Port {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u16>() {
            return Ok(Port::Number(n));
        }
        let name = s.to_ascii_lowercase();
        if service_port(&name).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown service name {s:?}"),
            ));
        }
        Ok(Port::Service(name))
    }
}

fn service_port(name: &str) -> Option<u16> {
    match name {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    }
}

/// Immutable `host:port` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: Port,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: Port) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:https`.
    pub fn https(host: impl Into<String>) -> Self {
        Self::new(host, Port::Service("https".into()))
    }

    /// `host:http`.
    pub fn http(host: impl Into<String>) -> Self {
        Self::new(host, Port::Service("http".into()))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Resolve to socket addresses, in resolver order.
    pub fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let port = self.port.number()?;
        let addrs: Vec<SocketAddr> = (self.host.as_str(), port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.host),
            ));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = io::Error;

    /// Parses `host:port`, `[v6]:port`, or a bare host (defaults to `https`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || io::Error::new(io::ErrorKind::InvalidInput, format!("invalid endpoint {s:?}"));
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            return match tail.strip_prefix(':') {
                Some(port) => Ok(Self::new(host, port.parse()?)),
                None if tail.is_empty() => Ok(Self::https(host)),
                None => Err(invalid()),
            };
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.contains(':') => {
                Ok(Self::new(host, port.parse()?))
            }
            Some(_) => Err(invalid()),
            None if !s.is_empty() => Ok(Self::https(s)),
            None => Err(invalid()),
        }
    }
}
