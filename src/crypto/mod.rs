//! Cryptographic primitives behind the TLS 1.3 engine.
//!
//! AEAD and HKDF are traits so the record layer and key schedule are
//! written once; [`RecordCipher`] picks the concrete AEAD at runtime once
//! the server has chosen a cipher suite.

mod aead;
mod hkdf;

pub mod key_schedule;
pub mod rustcrypto;
pub mod signature;

pub use aead::Aead;
pub use hkdf::Hkdf;

use crate::error::TlsError;
use crate::tls::messages::CipherSuite;
use rustcrypto::{Aes128GcmAead, ChaCha20Poly1305Aead};

/// AEAD instance for the negotiated cipher suite.
pub enum RecordCipher {
    Aes128Gcm(Aes128GcmAead),
    ChaCha20Poly1305(ChaCha20Poly1305Aead),
}

impl RecordCipher {
    pub fn new(suite: CipherSuite, key: &[u8]) -> Result<Self, TlsError> {
        Ok(match suite {
            CipherSuite::TlsAes128GcmSha256 => Self::Aes128Gcm(Aes128GcmAead::new(key)?),
            CipherSuite::TlsChacha20Poly1305Sha256 => {
                Self::ChaCha20Poly1305(ChaCha20Poly1305Aead::new(key)?)
            }
        })
    }

    pub fn key_len(suite: CipherSuite) -> usize {
        match suite {
            CipherSuite::TlsAes128GcmSha256 => Aes128GcmAead::KEY_LEN,
            CipherSuite::TlsChacha20Poly1305Sha256 => ChaCha20Poly1305Aead::KEY_LEN,
        }
    }

    pub const TAG_LEN: usize = 16;

    pub fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, TlsError> {
        match self {
            Self::Aes128Gcm(a) => a.seal_in_place(nonce, aad, buf, payload_len),
            Self::ChaCha20Poly1305(a) => a.seal_in_place(nonce, aad, buf, payload_len),
        }
    }

    pub fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, TlsError> {
        match self {
            Self::Aes128Gcm(a) => a.open_in_place(nonce, aad, buf, ciphertext_len),
            Self::ChaCha20Poly1305(a) => a.open_in_place(nonce, aad, buf, ciphertext_len),
        }
    }
}
