//! Session-level settings shared by every session of a context.

use std::path::PathBuf;

use crate::transport::TransportConfig;

/// Trust bundle used when none is configured.
pub const DEFAULT_CA_FILE: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Whether sessions negotiate TLS or run directly on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Tls,
    /// No encryption and no peer verification.
    Plaintext,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// PEM bundle of trust anchors. Only read in TLS mode.
    pub ca_file: PathBuf,
    /// Offered ALPN protocols, in preference order. Empty omits the
    /// extension.
    pub alpn: Vec<Vec<u8>>,
    /// SNI override; defaults to the endpoint host.
    pub server_name: Option<String>,
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Tls,
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
            alpn: Vec::new(),
            server_name: None,
            transport: TransportConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn plaintext() -> Self {
        Self {
            mode: SessionMode::Plaintext,
            ..Self::default()
        }
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = path.into();
        self
    }

    pub fn with_alpn<P: AsRef<[u8]>>(mut self, protocols: impl IntoIterator<Item = P>) -> Self {
        self.alpn = protocols.into_iter().map(|p| p.as_ref().to_vec()).collect();
        self
    }
}
