//! TLS 1.3 alerts (RFC 8446 §6).

use crate::error::TlsError;

pub const LEVEL_WARNING: u8 = 1;
pub const LEVEL_FATAL: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    IllegalParameter = 47,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InternalError = 80,
    UserCanceled = 90,
    UnsupportedExtension = 110,
}

impl AlertDescription {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::CloseNotify,
            10 => Self::UnexpectedMessage,
            20 => Self::BadRecordMac,
            22 => Self::RecordOverflow,
            40 => Self::HandshakeFailure,
            42 => Self::BadCertificate,
            47 => Self::IllegalParameter,
            50 => Self::DecodeError,
            51 => Self::DecryptError,
            70 => Self::ProtocolVersion,
            80 => Self::InternalError,
            90 => Self::UserCanceled,
            110 => Self::UnsupportedExtension,
            _ => return None,
        })
    }

    /// Alert we send to the peer when the local engine fails with `err`.
    pub fn for_error(err: TlsError) -> Option<Self> {
        Some(match err {
            TlsError::Decode => Self::DecodeError,
            TlsError::UnexpectedMessage(_) | TlsError::UnexpectedRecord(_) => {
                Self::UnexpectedMessage
            }
            TlsError::Crypto => Self::BadRecordMac,
            TlsError::Unsupported(_) => Self::HandshakeFailure,
            TlsError::BadSignature | TlsError::BadFinished => Self::DecryptError,
            TlsError::NoCertificate => Self::BadCertificate,
            TlsError::ExtensionRejected(_) => Self::UnsupportedExtension,
            TlsError::BufferTooSmall { .. } => Self::InternalError,
            // The peer already told us, or the connection is gone.
            TlsError::PeerAlert(_) | TlsError::Closed => return None,
        })
    }
}
