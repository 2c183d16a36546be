//! TLS 1.3 handshake message encoding and decoding.
//!
//! Handshake message format:
//!   HandshakeType (1 byte)
//!   Length (3 bytes, big-endian)
//!   Body (Length bytes)
//!
//! Parsers take the body (after the 4-byte header) and borrow from it.

use crate::error::TlsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateRequest = 13,
    CertificateVerify = 15,
    Finished = 20,
    KeyUpdate = 24,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::ClientHello,
            2 => Self::ServerHello,
            4 => Self::NewSessionTicket,
            8 => Self::EncryptedExtensions,
            11 => Self::Certificate,
            13 => Self::CertificateRequest,
            15 => Self::CertificateVerify,
            20 => Self::Finished,
            24 => Self::KeyUpdate,
            _ => return None,
        })
    }
}

/// Cipher suites offered by the client, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    TlsAes128GcmSha256,
    TlsChacha20Poly1305Sha256,
}

impl CipherSuite {
    pub const ALL: [CipherSuite; 2] = [Self::TlsAes128GcmSha256, Self::TlsChacha20Poly1305Sha256];

    pub fn to_u16(self) -> u16 {
        match self {
            Self::TlsAes128GcmSha256 => 0x1301,
            Self::TlsChacha20Poly1305Sha256 => 0x1303,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x1301 => Some(Self::TlsAes128GcmSha256),
            0x1303 => Some(Self::TlsChacha20Poly1305Sha256),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TlsAes128GcmSha256 => "TLS_AES_128_GCM_SHA256",
            Self::TlsChacha20Poly1305Sha256 => "TLS_CHACHA20_POLY1305_SHA256",
        }
    }
}

/// SHA-256("HelloRetryRequest"), the magic ServerHello.random of an HRR.
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8,
    0x91, 0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8,
    0x33, 0x9c,
];

pub struct ClientHello<'a> {
    pub random: &'a [u8; 32],
    pub session_id: &'a [u8],
    pub cipher_suites: &'a [u8],
    pub extensions: &'a [u8],
}

pub struct ServerHello<'a> {
    pub random: &'a [u8; 32],
    pub session_id: &'a [u8],
    pub cipher_suite: u16,
    pub extensions: &'a [u8],
}

pub struct CertificatePayload<'a> {
    pub context: &'a [u8],
    /// Raw certificate_list bytes; walk with [`iter_certificate_entries`].
    pub entries: &'a [u8],
}

pub struct CertificateEntry<'a> {
    pub cert_data: &'a [u8],
    pub extensions: &'a [u8],
}

pub struct CertificateVerify<'a> {
    pub algorithm: u16,
    pub signature: &'a [u8],
}

// ---- framing helpers ----

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
}

pub(crate) fn get_u16(data: &[u8], off: usize) -> Result<u16, TlsError> {
    match data.get(off..off + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(TlsError::Decode),
    }
}

pub(crate) fn get_u24(data: &[u8], off: usize) -> Result<usize, TlsError> {
    match data.get(off..off + 3) {
        Some(b) => Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize),
        None => Err(TlsError::Decode),
    }
}

/// Borrow `len` bytes at `off`, failing instead of panicking on truncation.
pub(crate) fn take(data: &[u8], off: usize, len: usize) -> Result<&[u8], TlsError> {
    data.get(off..off.checked_add(len).ok_or(TlsError::Decode)?)
        .ok_or(TlsError::Decode)
}

/// Append a complete handshake message (header + body) to `out`.
pub fn encode_handshake(msg_type: HandshakeType, body: &[u8], out: &mut Vec<u8>) {
    out.push(msg_type as u8);
    put_u24(out, body.len());
    out.extend_from_slice(body);
}

/// Read a handshake header: `(type_byte, body_length)`.
pub fn read_handshake_header(data: &[u8]) -> Result<(u8, usize), TlsError> {
    if data.len() < 4 {
        return Err(TlsError::Decode);
    }
    Ok((data[0], get_u24(data, 1)?))
}

// ---- client side ----

/// Encode a ClientHello.
///
///   legacy_version 0x0303 | random(32) | session_id<0..32>
///   | cipher_suites<2..> | compression_methods = [0] | extensions<..>
pub fn encode_client_hello(
    random: &[u8; 32],
    session_id: &[u8],
    cipher_suites: &[CipherSuite],
    extensions: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), TlsError> {
    if session_id.len() > 32 || extensions.len() > u16::MAX as usize {
        return Err(TlsError::BufferTooSmall {
            needed: extensions.len(),
        });
    }
    let mut body = Vec::with_capacity(2 + 32 + 1 + session_id.len() + 8 + extensions.len());
    put_u16(&mut body, 0x0303);
    body.extend_from_slice(random);
    body.push(session_id.len() as u8);
    body.extend_from_slice(session_id);
    put_u16(&mut body, (cipher_suites.len() * 2) as u16);
    for cs in cipher_suites {
        put_u16(&mut body, cs.to_u16());
    }
    body.extend_from_slice(&[1, 0]);
    put_u16(&mut body, extensions.len() as u16);
    body.extend_from_slice(extensions);
    encode_handshake(HandshakeType::ClientHello, &body, out);
    Ok(())
}

pub fn parse_server_hello(data: &[u8]) -> Result<ServerHello<'_>, TlsError> {
    let mut off = 2; // legacy_version
    let random: &[u8; 32] = take(data, off, 32)?
        .try_into()
        .map_err(|_| TlsError::Decode)?;
    off += 32;

    let sid_len = *data.get(off).ok_or(TlsError::Decode)? as usize;
    off += 1;
    let session_id = take(data, off, sid_len)?;
    off += sid_len;

    let cipher_suite = get_u16(data, off)?;
    off += 2;

    if *data.get(off).ok_or(TlsError::Decode)? != 0 {
        return Err(TlsError::Decode);
    }
    off += 1;

    let ext_len = get_u16(data, off)? as usize;
    off += 2;
    let extensions = take(data, off, ext_len)?;

    Ok(ServerHello {
        random,
        session_id,
        cipher_suite,
        extensions,
    })
}

/// Returns the raw extensions block of an EncryptedExtensions body.
pub fn parse_encrypted_extensions(data: &[u8]) -> Result<&[u8], TlsError> {
    let ext_len = get_u16(data, 0)? as usize;
    if 2 + ext_len != data.len() {
        return Err(TlsError::Decode);
    }
    Ok(&data[2..])
}

pub fn parse_certificate(data: &[u8]) -> Result<CertificatePayload<'_>, TlsError> {
    let ctx_len = *data.first().ok_or(TlsError::Decode)? as usize;
    let context = take(data, 1, ctx_len)?;
    let mut off = 1 + ctx_len;
    let list_len = get_u24(data, off)?;
    off += 3;
    let entries = take(data, off, list_len)?;
    Ok(CertificatePayload { context, entries })
}

fn parse_certificate_entry(data: &[u8]) -> Result<(CertificateEntry<'_>, usize), TlsError> {
    let cert_len = get_u24(data, 0)?;
    let cert_data = take(data, 3, cert_len)?;
    let ext_len = get_u16(data, 3 + cert_len)? as usize;
    let extensions = take(data, 5 + cert_len, ext_len)?;
    let entry = CertificateEntry {
        cert_data,
        extensions,
    };
    Ok((entry, 5 + cert_len + ext_len))
}

/// Walk a certificate_list. A malformed entry yields one error and ends
/// the iteration.
pub fn iter_certificate_entries(
    mut data: &[u8],
) -> impl Iterator<Item = Result<CertificateEntry<'_>, TlsError>> + '_ {
    core::iter::from_fn(move || {
        if data.is_empty() {
            return None;
        }
        match parse_certificate_entry(data) {
            Ok((entry, used)) => {
                data = &data[used..];
                Some(Ok(entry))
            }
            Err(e) => {
                data = &[];
                Some(Err(e))
            }
        }
    })
}

pub fn parse_certificate_verify(data: &[u8]) -> Result<CertificateVerify<'_>, TlsError> {
    let algorithm = get_u16(data, 0)?;
    let sig_len = get_u16(data, 2)? as usize;
    if 4 + sig_len != data.len() {
        return Err(TlsError::Decode);
    }
    Ok(CertificateVerify {
        algorithm,
        signature: &data[4..],
    })
}

/// verify_data is exactly one SHA-256 output.
pub fn parse_finished(data: &[u8]) -> Result<&[u8; 32], TlsError> {
    data.try_into().map_err(|_| TlsError::Decode)
}

pub fn encode_finished(verify_data: &[u8], out: &mut Vec<u8>) {
    encode_handshake(HandshakeType::Finished, verify_data, out);
}

// ---- server side (loopback servers and tests) ----

pub fn parse_client_hello(data: &[u8]) -> Result<ClientHello<'_>, TlsError> {
    let mut off = 2;
    let random: &[u8; 32] = take(data, off, 32)?
        .try_into()
        .map_err(|_| TlsError::Decode)?;
    off += 32;

    let sid_len = *data.get(off).ok_or(TlsError::Decode)? as usize;
    off += 1;
    let session_id = take(data, off, sid_len)?;
    off += sid_len;

    let cs_len = get_u16(data, off)? as usize;
    off += 2;
    let cipher_suites = take(data, off, cs_len)?;
    off += cs_len;

    let comp_len = *data.get(off).ok_or(TlsError::Decode)? as usize;
    off += 1 + comp_len;

    let ext_len = get_u16(data, off)? as usize;
    off += 2;
    let extensions = take(data, off, ext_len)?;

    Ok(ClientHello {
        random,
        session_id,
        cipher_suites,
        extensions,
    })
}

pub fn iter_cipher_suites(data: &[u8]) -> impl Iterator<Item = u16> + '_ {
    data.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]]))
}

pub fn encode_server_hello(
    random: &[u8; 32],
    session_id: &[u8],
    cipher_suite: CipherSuite,
    extensions: &[u8],
    out: &mut Vec<u8>,
) {
    let mut body = Vec::with_capacity(40 + session_id.len() + extensions.len());
    put_u16(&mut body, 0x0303);
    body.extend_from_slice(random);
    body.push(session_id.len() as u8);
    body.extend_from_slice(session_id);
    put_u16(&mut body, cipher_suite.to_u16());
    body.push(0);
    put_u16(&mut body, extensions.len() as u16);
    body.extend_from_slice(extensions);
    encode_handshake(HandshakeType::ServerHello, &body, out);
}

pub fn encode_encrypted_extensions(extensions: &[u8], out: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(2 + extensions.len());
    put_u16(&mut body, extensions.len() as u16);
    body.extend_from_slice(extensions);
    encode_handshake(HandshakeType::EncryptedExtensions, &body, out);
}

/// Encode a Certificate message from `(cert_der, entry_extensions)` pairs.
pub fn encode_certificate(chain: &[(&[u8], &[u8])], out: &mut Vec<u8>) {
    let mut list = Vec::new();
    for (cert, exts) in chain {
        put_u24(&mut list, cert.len());
        list.extend_from_slice(cert);
        put_u16(&mut list, exts.len() as u16);
        list.extend_from_slice(exts);
    }
    let mut body = Vec::with_capacity(4 + list.len());
    body.push(0);
    put_u24(&mut body, list.len());
    body.extend_from_slice(&list);
    encode_handshake(HandshakeType::Certificate, &body, out);
}

pub fn encode_certificate_verify(algorithm: u16, signature: &[u8], out: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(4 + signature.len());
    put_u16(&mut body, algorithm);
    put_u16(&mut body, signature.len() as u16);
    body.extend_from_slice(signature);
    encode_handshake(HandshakeType::CertificateVerify, &body, out);
}
