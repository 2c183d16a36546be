//! RustCrypto-backed implementations of the [`Aead`] and [`Hkdf`] traits.

use aes_gcm::aead::{AeadInPlace, KeyInit};

use crate::crypto::{Aead, Hkdf};
use crate::error::TlsError;

// ---- HKDF-SHA256 ----

/// HKDF using SHA-256; both offered suites hash with SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct HkdfSha256;

impl Hkdf for HkdfSha256 {
    const HASH_LEN: usize = 32;

    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]) {
        let (out, _) = hkdf::Hkdf::<sha2::Sha256>::extract(Some(salt), ikm);
        prk[..32].copy_from_slice(&out);
    }

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), TlsError> {
        let hk = hkdf::Hkdf::<sha2::Sha256>::from_prk(prk).map_err(|_| TlsError::Crypto)?;
        hk.expand(info, okm).map_err(|_| TlsError::Crypto)
    }
}

// Both AEADs share the detached-tag layout: `buf = ciphertext || tag`.
fn seal_detached<C: AeadInPlace>(
    cipher: &C,
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    payload_len: usize,
) -> Result<usize, TlsError> {
    if nonce.len() != 12 {
        return Err(TlsError::Crypto);
    }
    let total = payload_len + 16;
    if buf.len() < total {
        return Err(TlsError::BufferTooSmall { needed: total });
    }
    let tag = cipher
        .encrypt_in_place_detached(nonce.into(), aad, &mut buf[..payload_len])
        .map_err(|_| TlsError::Crypto)?;
    buf[payload_len..total].copy_from_slice(&tag);
    Ok(total)
}

fn open_detached<C: AeadInPlace>(
    cipher: &C,
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    ciphertext_len: usize,
) -> Result<usize, TlsError> {
    if nonce.len() != 12 || ciphertext_len < 16 || ciphertext_len > buf.len() {
        return Err(TlsError::Crypto);
    }
    let plaintext_len = ciphertext_len - 16;
    let (data, rest) = buf.split_at_mut(plaintext_len);
    let tag = &rest[..16];
    cipher
        .decrypt_in_place_detached(nonce.into(), aad, data, tag.into())
        .map_err(|_| TlsError::Crypto)?;
    Ok(plaintext_len)
}

// ---- AES-128-GCM AEAD ----

pub struct Aes128GcmAead {
    cipher: aes_gcm::Aes128Gcm,
}

impl Aes128GcmAead {
    pub fn new(key: &[u8]) -> Result<Self, TlsError> {
        let cipher = aes_gcm::Aes128Gcm::new_from_slice(key).map_err(|_| TlsError::Crypto)?;
        Ok(Self { cipher })
    }
}

impl Aead for Aes128GcmAead {
    const KEY_LEN: usize = 16;
    const NONCE_LEN: usize = 12;
    const TAG_LEN: usize = 16;

    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, TlsError> {
        seal_detached(&self.cipher, nonce, aad, buf, payload_len)
    }

    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, TlsError> {
        open_detached(&self.cipher, nonce, aad, buf, ciphertext_len)
    }
}

// ---- ChaCha20-Poly1305 AEAD ----

pub struct ChaCha20Poly1305Aead {
    cipher: chacha20poly1305::ChaCha20Poly1305,
}

impl ChaCha20Poly1305Aead {
    pub fn new(key: &[u8]) -> Result<Self, TlsError> {
        let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| TlsError::Crypto)?;
        Ok(Self { cipher })
    }
}

impl Aead for ChaCha20Poly1305Aead {
    const KEY_LEN: usize = 32;
    const NONCE_LEN: usize = 12;
    const TAG_LEN: usize = 16;

    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, TlsError> {
        seal_detached(&self.cipher, nonce, aad, buf, payload_len)
    }

    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, TlsError> {
        open_detached(&self.cipher, nonce, aad, buf, ciphertext_len)
    }
}
