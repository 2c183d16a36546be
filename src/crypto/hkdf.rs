use crate::error::TlsError;

/// HMAC-based Key Derivation Function (RFC 5869).
pub trait Hkdf {
    const HASH_LEN: usize;

    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]);

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), TlsError>;
}
