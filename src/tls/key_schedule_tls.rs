//! TLS 1.3 key schedule (RFC 8446 §7.1), without PSKs.
//!
//! ```text
//!             0
//!             |
//!   0 ->  HKDF-Extract = Early Secret
//!             |
//!       Derive-Secret(., "derived", "")
//!             |
//!   ECDHE -> HKDF-Extract = Handshake Secret
//!             +-> Derive-Secret(., "c hs traffic", CH..SH)
//!             +-> Derive-Secret(., "s hs traffic", CH..SH)
//!       Derive-Secret(., "derived", "")
//!             |
//!   0 ->  HKDF-Extract = Master Secret
//!             +-> Derive-Secret(., "c ap traffic", CH..server Finished)
//!             +-> Derive-Secret(., "s ap traffic", CH..server Finished)
//! ```

use crate::crypto::key_schedule::hkdf_expand_label;
use crate::crypto::Hkdf;
use crate::error::TlsError;
use crate::tls::transcript::TranscriptHash;

/// Client and server traffic secrets for one epoch.
#[derive(Clone)]
pub struct TrafficSecrets {
    pub client: [u8; 32],
    pub server: [u8; 32],
}

pub struct TlsKeySchedule<H: Hkdf> {
    hkdf: H,
    handshake_secret: [u8; 32],
}

impl<H: Hkdf> TlsKeySchedule<H> {
    /// Run Early Secret → Handshake Secret with the ECDHE shared secret.
    pub fn new(hkdf: H, shared_secret: &[u8; 32]) -> Result<Self, TlsError> {
        let mut early_secret = [0u8; 32];
        hkdf.extract(&[0u8; 32], &[0u8; 32], &mut early_secret);
        let salt = derive_secret(&hkdf, &early_secret, b"derived", &TranscriptHash::empty_hash())?;
        let mut handshake_secret = [0u8; 32];
        hkdf.extract(&salt, shared_secret, &mut handshake_secret);
        Ok(Self {
            hkdf,
            handshake_secret,
        })
    }

    /// `hello_hash` covers ClientHello..ServerHello.
    pub fn handshake_traffic_secrets(&self, hello_hash: &[u8; 32]) -> Result<TrafficSecrets, TlsError> {
        Ok(TrafficSecrets {
            client: derive_secret(&self.hkdf, &self.handshake_secret, b"c hs traffic", hello_hash)?,
            server: derive_secret(&self.hkdf, &self.handshake_secret, b"s hs traffic", hello_hash)?,
        })
    }

    pub fn master_secret(&self) -> Result<[u8; 32], TlsError> {
        let salt = derive_secret(
            &self.hkdf,
            &self.handshake_secret,
            b"derived",
            &TranscriptHash::empty_hash(),
        )?;
        let mut master = [0u8; 32];
        self.hkdf.extract(&salt, &[0u8; 32], &mut master);
        Ok(master)
    }

    /// `handshake_hash` covers ClientHello..server Finished.
    pub fn application_traffic_secrets(
        &self,
        handshake_hash: &[u8; 32],
    ) -> Result<TrafficSecrets, TlsError> {
        let master = self.master_secret()?;
        Ok(TrafficSecrets {
            client: derive_secret(&self.hkdf, &master, b"c ap traffic", handshake_hash)?,
            server: derive_secret(&self.hkdf, &master, b"s ap traffic", handshake_hash)?,
        })
    }

    /// Finished verify_data = HMAC(finished_key, transcript_hash), where
    /// finished_key = HKDF-Expand-Label(base_secret, "finished", "", 32).
    pub fn finished_verify_data(
        &self,
        base_secret: &[u8; 32],
        transcript_hash: &[u8; 32],
    ) -> Result<[u8; 32], TlsError> {
        let mut finished_key = [0u8; 32];
        hkdf_expand_label(&self.hkdf, base_secret, b"finished", &[], &mut finished_key)?;
        // HKDF-Extract(salt, ikm) is HMAC(salt, ikm).
        let mut verify_data = [0u8; 32];
        self.hkdf.extract(&finished_key, transcript_hash, &mut verify_data);
        Ok(verify_data)
    }

    #[cfg(test)]
    fn handshake_secret(&self) -> &[u8; 32] {
        &self.handshake_secret
    }
}

fn derive_secret<H: Hkdf>(
    hkdf: &H,
    secret: &[u8; 32],
    label: &[u8],
    transcript_hash: &[u8; 32],
) -> Result<[u8; 32], TlsError> {
    let mut out = [0u8; 32];
    hkdf_expand_label(hkdf, secret, label, transcript_hash, &mut out)?;
    Ok(out)
}
