//! TLS 1.3 record layer codec (RFC 8446 §5).

use crate::crypto::key_schedule::derive_traffic_keys;
use crate::crypto::rustcrypto::HkdfSha256;
use crate::crypto::RecordCipher;
use crate::error::TlsError;
use crate::tls::messages::CipherSuite;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            20 => Some(Self::ChangeCipherSpec),
            21 => Some(Self::Alert),
            22 => Some(Self::Handshake),
            23 => Some(Self::ApplicationData),
            _ => None,
        }
    }
}

/// TLS record header (5 bytes).
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub legacy_version: u16,
    pub length: u16,
}

/// TLS 1.3 record header size.
pub const RECORD_HEADER_LEN: usize = 5;

/// Largest plaintext fragment per record.
pub const MAX_FRAGMENT: usize = 16384;

/// Maximum TLS record payload (RFC 8446 §5.2): plaintext + expansion.
pub const MAX_RECORD_PAYLOAD: usize = MAX_FRAGMENT + 256;

/// The ChangeCipherSpec record sent once for middlebox compatibility.
pub const CHANGE_CIPHER_SPEC: [u8; 6] = [20, 0x03, 0x03, 0x00, 0x01, 0x01];

pub fn encode_record_header(ct: ContentType, length: u16) -> [u8; RECORD_HEADER_LEN] {
    let len = length.to_be_bytes();
    // legacy_record_version = TLS 1.2
    [ct as u8, 0x03, 0x03, len[0], len[1]]
}

pub fn decode_record_header(data: &[u8]) -> Result<RecordHeader, TlsError> {
    if data.len() < RECORD_HEADER_LEN {
        return Err(TlsError::BufferTooSmall {
            needed: RECORD_HEADER_LEN,
        });
    }
    let content_type = ContentType::from_byte(data[0]).ok_or(TlsError::UnexpectedRecord(data[0]))?;
    let legacy_version = u16::from_be_bytes([data[1], data[2]]);
    let length = u16::from_be_bytes([data[3], data[4]]);
    if length as usize > MAX_RECORD_PAYLOAD {
        return Err(TlsError::Decode);
    }
    Ok(RecordHeader {
        content_type,
        legacy_version,
        length,
    })
}

/// Append an unprotected record (ClientHello, alerts before keys exist).
pub fn encode_plaintext_record(ct: ContentType, payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&encode_record_header(ct, payload.len() as u16));
    out.extend_from_slice(payload);
}

/// Build a nonce for AEAD: iv XOR padded_sequence_number (RFC 8446 §5.3).
pub fn build_nonce(iv: &[u8; 12], seq: u64) -> [u8; 12] {
    let mut nonce = *iv;
    for (n, s) in nonce[4..].iter_mut().zip(seq.to_be_bytes()) {
        *n ^= s;
    }
    nonce
}

/// AEAD state for one direction: cipher, static IV and sequence number.
pub struct RecordProtection {
    cipher: RecordCipher,
    iv: [u8; 12],
    seq: u64,
}

impl RecordProtection {
    /// Derive key and IV from a traffic secret for `suite`.
    pub fn new(suite: CipherSuite, secret: &[u8; 32]) -> Result<Self, TlsError> {
        let keys = derive_traffic_keys(&HkdfSha256, secret, RecordCipher::key_len(suite))?;
        Ok(Self {
            cipher: RecordCipher::new(suite, &keys.key)?,
            iv: keys.iv,
            seq: 0,
        })
    }

    /// Encrypt `payload` as one record with `inner` as its true content
    /// type and append it to `out`.
    pub fn seal(&mut self, inner: ContentType, payload: &[u8], out: &mut Vec<u8>) -> Result<(), TlsError> {
        if payload.len() > MAX_FRAGMENT {
            return Err(TlsError::BufferTooSmall {
                needed: payload.len(),
            });
        }
        let seq = self.next_seq()?;
        let inner_len = payload.len() + 1;
        let outer_len = inner_len + RecordCipher::TAG_LEN;
        let header = encode_record_header(ContentType::ApplicationData, outer_len as u16);
        out.extend_from_slice(&header);

        let start = out.len();
        out.extend_from_slice(payload);
        out.push(inner as u8);
        out.resize(start + outer_len, 0);

        let nonce = build_nonce(&self.iv, seq);
        let sealed = self
            .cipher
            .seal_in_place(&nonce, &header, &mut out[start..], inner_len);
        match sealed {
            Ok(n) => {
                out.truncate(start + n);
                Ok(())
            }
            Err(e) => {
                out.truncate(start - RECORD_HEADER_LEN);
                Err(e)
            }
        }
    }

    /// Decrypt a protected record body in place. Returns the inner content
    /// type and the plaintext length at the front of `body`.
    pub fn open(&mut self, header: &[u8; RECORD_HEADER_LEN], body: &mut [u8]) -> Result<(ContentType, usize), TlsError> {
        let seq = self.next_seq()?;
        let nonce = build_nonce(&self.iv, seq);
        let len = body.len();
        let plain_len = self.cipher.open_in_place(&nonce, header, body, len)?;
        find_inner_content_type(&body[..plain_len])
    }

    fn next_seq(&mut self) -> Result<u64, TlsError> {
        let seq = self.seq;
        self.seq = seq.checked_add(1).ok_or(TlsError::Crypto)?;
        Ok(seq)
    }
}

/// The inner content type is the last non-zero byte of the plaintext;
/// everything before it is data, everything after it padding.
fn find_inner_content_type(plaintext: &[u8]) -> Result<(ContentType, usize), TlsError> {
    let pos = plaintext
        .iter()
        .rposition(|&b| b != 0)
        .ok_or(TlsError::UnexpectedRecord(0))?;
    let ct = ContentType::from_byte(plaintext[pos]).ok_or(TlsError::UnexpectedRecord(plaintext[pos]))?;
    Ok((ct, pos))
}
