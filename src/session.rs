//! Secure sessions and the context they are created from.
//!
//! ```text
//! Unconnected -> Connecting -> Handshaking -> Established -> Closed
//!                     |             |
//!                     +-> Failed <--+
//! ```
//!
//! Plaintext sessions skip `Handshaking`. A [`Session`] borrows its
//! [`SessionContext`], so it can never outlive the trust store, hooks and
//! connector it was built from.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::config::{SessionConfig, SessionMode};
use crate::endpoint::Endpoint;
use crate::error::{Error, HandshakeFailure, Result, TlsError};
use crate::ext::ExtensionRegistry;
use crate::tcp_tls::{TlsConnection, TlsStream};
use crate::tls::handshake::{ClientHelloConfig, HandshakeEntropy};
use crate::tls::messages::CipherSuite;
use crate::transport::{Connector, TcpConnector, Transport};
use crate::trust::{TrustStore, VerificationResult, VerifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Handshaking,
    Established,
    Closed,
    /// Connect or handshake failed; terminal.
    Failed,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Long-lived, immutable configuration: trust anchors, extension hooks,
/// the transport connector and session settings.
pub struct SessionContext<C: Connector = TcpConnector> {
    config: SessionConfig,
    trust: Arc<TrustStore>,
    registry: ExtensionRegistry,
    connector: C,
}

impl SessionContext<TcpConnector> {
    /// Load the trust store named by `config` and connect over TCP.
    pub fn new(config: SessionConfig, registry: ExtensionRegistry) -> Result<Self> {
        let connector = TcpConnector::new(config.transport.clone());
        Self::with_connector(config, registry, connector)
    }
}

impl<C: Connector> SessionContext<C> {
    /// Fails with [`Error::TrustStoreLoad`] before any network activity when
    /// the bundle cannot be loaded. Plaintext contexts read no bundle.
    pub fn with_connector(config: SessionConfig, registry: ExtensionRegistry, connector: C) -> Result<Self> {
        let trust = match config.mode {
            SessionMode::Tls => TrustStore::load(&config.ca_file)?,
            SessionMode::Plaintext => TrustStore::default(),
        };
        Ok(Self::with_trust_store(config, Arc::new(trust), registry, connector))
    }

    /// Use an already loaded trust store; `config.ca_file` is ignored.
    pub fn with_trust_store(
        config: SessionConfig,
        trust: Arc<TrustStore>,
        registry: ExtensionRegistry,
        connector: C,
    ) -> Self {
        debug!(
            mode = ?config.mode,
            anchors = trust.len(),
            hooks = registry.len(),
            "session context ready"
        );
        Self {
            config,
            trust,
            registry,
            connector,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn trust_store(&self) -> &Arc<TrustStore> {
        &self.trust
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// A fresh, unconnected session.
    pub fn session(&self) -> Session<'_, C> {
        Session {
            ctx: self,
            state: SessionState::Unconnected,
            channel: None,
            verification: None,
            alpn: None,
            cipher_suite: None,
            peer_chain: Vec::new(),
        }
    }

    /// Create a session and connect it to `endpoint`.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<Session<'_, C>> {
        let mut session = self.session();
        session.connect(endpoint)?;
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

enum Channel<'ctx, T: Transport> {
    Tls(TlsStream<'ctx, T>),
    Plain(T),
}

/// One conversation over one transport.
///
/// Dropping a session closes it.
pub struct Session<'ctx, C: Connector = TcpConnector> {
    ctx: &'ctx SessionContext<C>,
    state: SessionState,
    channel: Option<Channel<'ctx, C::Transport>>,
    verification: Option<VerificationResult>,
    alpn: Option<Vec<u8>>,
    cipher_suite: Option<CipherSuite>,
    peer_chain: Vec<Vec<u8>>,
}

impl<'ctx, C: Connector> Session<'ctx, C> {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Outcome of checking the peer chain against the trust store. `None`
    /// until established, and always `None` for plaintext sessions.
    pub fn verification_result(&self) -> Option<&VerificationResult> {
        self.verification.as_ref()
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    /// Certificates the server presented, leaf first.
    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        &self.peer_chain
    }

    /// Open the transport and, in TLS mode, run the handshake.
    pub fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        if self.state != SessionState::Unconnected {
            return Err(Error::InvalidState {
                op: "connect",
                state: self.state,
            });
        }
        self.state = SessionState::Connecting;
        info!(%endpoint, mode = ?self.ctx.config.mode, "connecting");

        let transport = match self.ctx.connector.connect(endpoint) {
            Ok(t) => t,
            Err(source) => {
                self.state = SessionState::Failed;
                return Err(Error::Connect {
                    endpoint: endpoint.clone(),
                    source,
                });
            }
        };

        match self.ctx.config.mode {
            SessionMode::Plaintext => {
                self.channel = Some(Channel::Plain(transport));
                self.state = SessionState::Established;
                debug!(%endpoint, "plaintext session established");
                Ok(())
            }
            SessionMode::Tls => self.handshake(endpoint, transport),
        }
    }

    fn handshake(&mut self, endpoint: &Endpoint, transport: C::Transport) -> Result<()> {
        self.state = SessionState::Handshaking;
        let ctx = self.ctx;
        let hello = ClientHelloConfig {
            server_name: ctx.config.server_name.as_deref().unwrap_or(endpoint.host()),
            alpn: &ctx.config.alpn,
            registry: &ctx.registry,
        };

        let mut stream = match TlsConnection::new_client(&hello, HandshakeEntropy::generate()) {
            Ok(conn) => TlsStream::new(conn, transport),
            Err(e) => {
                let mut transport = transport;
                let _ = transport.shutdown();
                return Err(self.fail(HandshakeFailure::Protocol(e)));
            }
        };
        if let Err(failure) = stream.handshake() {
            let _ = stream.shutdown();
            return Err(self.fail(failure));
        }

        let conn = stream.connection();
        self.alpn = conn.alpn().map(<[u8]>::to_vec);
        self.cipher_suite = conn.cipher_suite();
        self.peer_chain = conn.peer_chain().to_vec();

        let result = if conn.certificate_verified() {
            ctx.trust.verify(&self.peer_chain, SystemTime::now())
        } else {
            VerificationResult::Failed(VerifyError::UnsupportedKey)
        };
        info!(
            %endpoint,
            suite = ?self.cipher_suite.map(CipherSuite::name),
            alpn = ?self.alpn.as_deref().map(String::from_utf8_lossy),
            verify_code = result.code(),
            "TLS session established"
        );
        self.verification = Some(result);
        self.channel = Some(Channel::Tls(stream));
        self.state = SessionState::Established;
        Ok(())
    }

    fn fail(&mut self, failure: HandshakeFailure) -> Error {
        self.state = SessionState::Failed;
        debug!(error = %failure, "handshake failed");
        match failure {
            HandshakeFailure::Protocol(TlsError::ExtensionRejected(ext_type)) => {
                Error::ExtensionRejected { ext_type }
            }
            other => Error::Handshake(other),
        }
    }

    fn established(&mut self, op: &'static str) -> Result<&mut Channel<'ctx, C::Transport>> {
        match (self.state, self.channel.as_mut()) {
            (SessionState::Established, Some(channel)) => Ok(channel),
            (state, _) => Err(Error::InvalidState { op, state }),
        }
    }

    /// Read decrypted bytes. `Ok(0)` means the peer finished sending.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = match self.established("read")? {
            Channel::Tls(stream) => stream.read(buf),
            Channel::Plain(transport) => transport.read(buf),
        };
        result.map_err(Error::Read)
    }

    /// Write `data`; returns how much the transport accepted.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let result = match self.established("write")? {
            Channel::Tls(stream) => stream.write(data),
            Channel::Plain(transport) => transport.write(data),
        };
        result.map_err(Error::Write)
    }

    /// Send close_notify if established and release the transport. Safe in
    /// any state and idempotent; a failed session stays `Failed`.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            let result: io::Result<()> = match channel {
                Channel::Tls(mut stream) => stream.shutdown(),
                Channel::Plain(mut transport) => transport.shutdown(),
            };
            if let Err(e) = result {
                debug!(error = %e, "error while closing transport");
            }
        }
        if self.state != SessionState::Failed && self.state != SessionState::Closed {
            debug!(from = ?self.state, "session closed");
            self.state = SessionState::Closed;
        }
    }
}

impl<C: Connector> Drop for Session<'_, C> {
    fn drop(&mut self) {
        self.close();
    }
}
