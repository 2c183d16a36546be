//! Single-shot TLS 1.3 fetch client.
//!
//! Connect to an [`Endpoint`], negotiate TLS 1.3 (running any registered
//! extension hooks), check the peer chain against a [`TrustStore`], send one
//! request and stream the response into a writer. See [`exchange::run`].

#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod ext;
pub mod session;
pub mod tcp_tls;
pub mod tls;
pub mod transport;
pub mod trust;
pub mod x509;

#[cfg(test)]
mod testing;

pub use config::{SessionConfig, SessionMode};
pub use endpoint::{Endpoint, Port};
pub use error::{Error, HandshakeFailure, Result, TlsError};
pub use exchange::{fetch, http_get, run, ExchangePolicy, ExchangeReport, VerifyPolicy};
pub use ext::{DiagnosticSink, ExtensionRecord, ExtensionRegistry, Rejected};
pub use session::{Session, SessionContext, SessionState};
pub use transport::{Connector, TcpConnector, TcpTransport, Transport, TransportConfig};
pub use trust::{TrustStore, VerificationResult, VerifyError};
