//! Byte-stream transports underneath a session.
//!
//! A [`Connector`] turns an [`Endpoint`] into a connected [`Transport`].
//! The TCP implementation optionally hides interrupted system calls
//! (`auto_retry`); socket timeouts always surface as terminal errors.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use tracing::{debug, trace};

use crate::endpoint::Endpoint;

/// A connected, bidirectional byte stream.
pub trait Transport: Read + Write {
    /// Shut both directions down. Safe to call more than once.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Opens transports to endpoints.
pub trait Connector {
    type Transport: Transport;

    fn connect(&self, endpoint: &Endpoint) -> io::Result<Self::Transport>;
}

/// Socket-level settings for [`TcpConnector`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Retry reads and writes interrupted by signals instead of reporting them.
    pub auto_retry: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            auto_retry: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TransportConfig,
}

impl TcpConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn connect(&self, endpoint: &Endpoint) -> io::Result<TcpTransport> {
        let mut last_err = None;
        for addr in endpoint.resolve()? {
            debug!(%endpoint, %addr, "connecting");
            let attempt = match self.config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(self.config.read_timeout)?;
                    stream.set_write_timeout(self.config.write_timeout)?;
                    stream.set_nodelay(true)?;
                    return Ok(TcpTransport {
                        stream,
                        auto_retry: self.config.auto_retry,
                        timed: self.config.read_timeout.is_some()
                            || self.config.write_timeout.is_some(),
                        shut: false,
                    });
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)))
    }
}

/// Blocking TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    auto_retry: bool,
    timed: bool,
    shut: bool,
}

impl TcpTransport {
    pub fn from_stream(stream: TcpStream, auto_retry: bool) -> Self {
        Self {
            stream,
            auto_retry,
            timed: false,
            shut: false,
        }
    }

    // A blocking socket only reports WouldBlock when its timeout fired.
    fn classify(&self, e: io::Error) -> io::Error {
        if self.timed && e.kind() == io::ErrorKind::WouldBlock {
            io::Error::new(io::ErrorKind::TimedOut, e)
        } else {
            e
        }
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.stream.read(buf) {
                Err(e) if self.auto_retry && e.kind() == io::ErrorKind::Interrupted => {
                    trace!("read interrupted, retrying");
                }
                Err(e) => return Err(self.classify(e)),
                Ok(n) => return Ok(n),
            }
        }
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.stream.write(buf) {
                Err(e) if self.auto_retry && e.kind() == io::ErrorKind::Interrupted => {
                    trace!("write interrupted, retrying");
                }
                Err(e) => return Err(self.classify(e)),
                Ok(n) => return Ok(n),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        if self.shut {
            return Ok(());
        }
        self.shut = true;
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
