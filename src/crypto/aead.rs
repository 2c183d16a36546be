use crate::error::TlsError;

/// Authenticated Encryption with Associated Data.
///
/// TLS 1.3 record protection uses 12-byte nonces and 16-byte tags for
/// every suite this crate offers.
pub trait Aead {
    const KEY_LEN: usize;
    const NONCE_LEN: usize;
    const TAG_LEN: usize;

    /// Encrypt `buf[..payload_len]` in place and append the tag.
    ///
    /// Returns the ciphertext + tag length.
    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, TlsError>;

    /// Decrypt `buf[..ciphertext_len]` (ciphertext + tag) in place.
    ///
    /// Returns the plaintext length.
    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, TlsError>;
}
