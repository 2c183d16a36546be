use std::io;
use std::path::PathBuf;

use crate::endpoint::Endpoint;
use crate::session::SessionState;
use crate::trust::VerifyError;

/// Failures raised inside the TLS 1.3 engine and record layer.
///
/// Kept `Copy` so the sans-IO engine can stash the first fatal error and
/// keep returning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TlsError {
    #[error("malformed TLS message")]
    Decode,
    #[error("unexpected handshake message type {0}")]
    UnexpectedMessage(u8),
    #[error("unexpected record content type {0}")]
    UnexpectedRecord(u8),
    #[error("cryptographic operation failed")]
    Crypto,
    #[error("peer sent fatal alert {0}")]
    PeerAlert(u8),
    #[error("server selected unsupported {0}")]
    Unsupported(&'static str),
    #[error("CertificateVerify signature did not verify")]
    BadSignature,
    #[error("server Finished did not verify")]
    BadFinished,
    #[error("server did not present a certificate")]
    NoCertificate,
    #[error("extension {0} rejected by registered hook")]
    ExtensionRejected(u16),
    #[error("buffer too small, need {needed} bytes")]
    BufferTooSmall { needed: usize },
    #[error("connection closed")]
    Closed,
}

/// Errors surfaced by the public connector API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to {endpoint}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("failed to load trust store {}", path.display())]
    TrustStoreLoad {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed")]
    Handshake(#[source] HandshakeFailure),

    #[error("handshake extension {ext_type} rejected")]
    ExtensionRejected { ext_type: u16 },

    #[error("certificate verification error: {0}")]
    VerificationFailed(VerifyError),

    #[error("read failed")]
    Read(#[source] io::Error),

    #[error("write failed")]
    Write(#[source] io::Error),

    #[error("output sink write failed")]
    Output(#[source] io::Error),

    #[error("extension type {0} is already registered")]
    DuplicateExtension(u16),

    #[error("extension type {0} is handled by the TLS engine and cannot be hooked")]
    ReservedExtension(u16),

    #[error("extension payload of {len} bytes does not fit a 16-bit length")]
    PayloadTooLarge { len: usize },

    #[error("invalid armored block: {0}")]
    Armor(&'static str),

    #[error("malformed extension record: {0}")]
    MalformedRecord(&'static str),

    #[error("{op} called on a session in state {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
}

/// Cause of a failed handshake: either the protocol engine or the socket.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeFailure {
    #[error(transparent)]
    Protocol(#[from] TlsError),
    #[error("transport error during handshake")]
    Io(#[from] io::Error),
    #[error("peer closed the connection during the handshake")]
    Eof,
}

impl Error {
    /// True for failures that happened before the session was established.
    pub fn is_connect_phase(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::Handshake(_) | Error::ExtensionRejected { .. }
        )
    }
}

impl From<TlsError> for io::Error {
    fn from(e: TlsError) -> Self {
        let kind = match e {
            TlsError::Closed => io::ErrorKind::NotConnected,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_error_maps_to_invalid_data() {
        let io: io::Error = TlsError::Crypto.into();
        assert_eq!(io.kind(), io::ErrorKind::InvalidData);
        let io: io::Error = TlsError::Closed.into();
        assert_eq!(io.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn connect_phase_classification() {
        let e = Error::Handshake(HandshakeFailure::Eof);
        assert!(e.is_connect_phase());
        assert!(Error::ExtensionRejected { ext_type: 18 }.is_connect_phase());
        assert!(!Error::DuplicateExtension(18).is_connect_phase());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::DuplicateExtension(18).to_string(),
            "extension type 18 is already registered"
        );
        assert_eq!(
            TlsError::BufferTooSmall { needed: 5 }.to_string(),
            "buffer too small, need 5 bytes"
        );
    }
}
