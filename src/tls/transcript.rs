//! Running SHA-256 transcript over handshake messages (RFC 8446 §4.4.1).

use sha2::{Digest, Sha256};

#[derive(Clone, Default)]
pub struct TranscriptHash {
    hasher: Sha256,
}

impl TranscriptHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one complete handshake message, header included.
    pub fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    /// Hash of everything fed so far; the running state is untouched.
    pub fn current_hash(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }

    /// SHA-256 of the empty string, used by `Derive-Secret(., "derived", "")`.
    pub fn empty_hash() -> [u8; 32] {
        Sha256::digest(b"").into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn empty_transcript_is_sha256_of_nothing() {
        let expected = hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
        assert_eq!(TranscriptHash::new().current_hash(), expected);
        assert_eq!(TranscriptHash::empty_hash(), expected);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut t = TranscriptHash::new();
        t.update(b"hello");
        let partial = t.current_hash();
        t.update(b" world");
        assert_ne!(partial, t.current_hash());
        assert_eq!(t.current_hash(), <[u8; 32]>::from(Sha256::digest(b"hello world")));
        assert_eq!(t.current_hash(), t.current_hash());
    }
}
