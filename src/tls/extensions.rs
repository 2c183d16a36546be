//! TLS extension encoding and parsing.
//!
//! Extension format: type(2) + length(2) + data(length)
//!
//! The engine handles the extensions listed in [`ENGINE_EXTENSIONS`];
//! everything else the server sends is offered to the caller's
//! [`ExtensionRegistry`] and otherwise ignored.

use heapless::Vec as HVec;

use crate::crypto::signature::OFFERED_SCHEMES;
use crate::error::TlsError;
use crate::ext::ExtensionRegistry;
use crate::tls::messages::{get_u16, put_u16, take};

pub const EXT_SERVER_NAME: u16 = 0x0000;
pub const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
pub const EXT_ALPN: u16 = 0x0010;
pub const EXT_PRE_SHARED_KEY: u16 = 0x0029;
pub const EXT_EARLY_DATA: u16 = 0x002a;
pub const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
pub const EXT_COOKIE: u16 = 0x002c;
pub const EXT_PSK_KEY_EXCHANGE_MODES: u16 = 0x002d;
pub const EXT_KEY_SHARE: u16 = 0x0033;

/// Types the engine negotiates itself; hooks may not claim them.
pub const ENGINE_EXTENSIONS: &[u16] = &[
    EXT_SERVER_NAME,
    EXT_SUPPORTED_GROUPS,
    EXT_SIGNATURE_ALGORITHMS,
    EXT_ALPN,
    EXT_PRE_SHARED_KEY,
    EXT_EARLY_DATA,
    EXT_SUPPORTED_VERSIONS,
    EXT_COOKIE,
    EXT_PSK_KEY_EXCHANGE_MODES,
    EXT_KEY_SHARE,
];

pub const GROUP_X25519: u16 = 0x001d;
pub const TLS13: u16 = 0x0304;

/// Walk an extensions block as `(type, payload)` pairs.
pub fn iter_extensions(
    mut data: &[u8],
) -> impl Iterator<Item = Result<(u16, &[u8]), TlsError>> + '_ {
    core::iter::from_fn(move || {
        if data.is_empty() {
            return None;
        }
        let item = get_u16(data, 0).and_then(|ty| {
            let len = get_u16(data, 2)? as usize;
            Ok((ty, take(data, 4, len)?))
        });
        match item {
            Ok((ty, payload)) => {
                data = &data[4 + payload.len()..];
                Some(Ok((ty, payload)))
            }
            Err(e) => {
                data = &[];
                Some(Err(e))
            }
        }
    })
}

fn put_extension(out: &mut Vec<u8>, ext_type: u16, payload: &[u8]) {
    put_u16(out, ext_type);
    put_u16(out, payload.len() as u16);
    out.extend_from_slice(payload);
}

/// Inputs for the ClientHello extension block.
pub struct ClientHelloParams<'a> {
    /// DNS name for SNI; IP literals are never sent.
    pub server_name: Option<&'a str>,
    pub x25519_public: &'a [u8; 32],
    pub alpn: &'a [Vec<u8>],
}

/// Encode the ClientHello extensions: the engine's own, then one per
/// registered hook that chose to emit.
pub fn encode_client_hello_extensions(
    params: &ClientHelloParams<'_>,
    registry: &ExtensionRegistry,
    out: &mut Vec<u8>,
) -> Result<(), TlsError> {
    if let Some(name) = params.server_name {
        let name = name.as_bytes();
        let mut sni = Vec::with_capacity(5 + name.len());
        put_u16(&mut sni, (3 + name.len()) as u16);
        sni.push(0); // host_name
        put_u16(&mut sni, name.len() as u16);
        sni.extend_from_slice(name);
        put_extension(out, EXT_SERVER_NAME, &sni);
    }

    put_extension(out, EXT_SUPPORTED_VERSIONS, &[2, 0x03, 0x04]);

    let mut groups: HVec<u8, 4> = HVec::new();
    let _ = groups.extend_from_slice(&[0x00, 0x02]);
    let _ = groups.extend_from_slice(&GROUP_X25519.to_be_bytes());
    put_extension(out, EXT_SUPPORTED_GROUPS, &groups);

    let mut ks = Vec::with_capacity(38);
    put_u16(&mut ks, 36);
    put_u16(&mut ks, GROUP_X25519);
    put_u16(&mut ks, 32);
    ks.extend_from_slice(params.x25519_public);
    put_extension(out, EXT_KEY_SHARE, &ks);

    let mut sig = Vec::with_capacity(2 + OFFERED_SCHEMES.len() * 2);
    put_u16(&mut sig, (OFFERED_SCHEMES.len() * 2) as u16);
    for &scheme in OFFERED_SCHEMES {
        put_u16(&mut sig, scheme);
    }
    put_extension(out, EXT_SIGNATURE_ALGORITHMS, &sig);

    if !params.alpn.is_empty() {
        let mut list = Vec::new();
        for proto in params.alpn {
            if proto.is_empty() || proto.len() > 255 {
                return Err(TlsError::Decode);
            }
            list.push(proto.len() as u8);
            list.extend_from_slice(proto);
        }
        let mut alpn = Vec::with_capacity(2 + list.len());
        put_u16(&mut alpn, list.len() as u16);
        alpn.extend_from_slice(&list);
        put_extension(out, EXT_ALPN, &alpn);
    }

    for record in registry.emit_client_hello()? {
        record.encode_into(out);
    }

    if out.len() > u16::MAX as usize {
        return Err(TlsError::BufferTooSmall { needed: out.len() });
    }
    Ok(())
}

/// What the engine needs from ServerHello extensions.
#[derive(Debug, Default)]
pub struct ServerHelloExtensions {
    pub selected_version: u16,
    pub key_share: Option<[u8; 32]>,
}

pub fn parse_server_hello_extensions(
    data: &[u8],
    registry: &ExtensionRegistry,
) -> Result<ServerHelloExtensions, TlsError> {
    let mut result = ServerHelloExtensions::default();
    for ext in iter_extensions(data) {
        let (ty, payload) = ext?;
        match ty {
            EXT_SUPPORTED_VERSIONS => result.selected_version = get_u16(payload, 0)?,
            EXT_KEY_SHARE => {
                if get_u16(payload, 0)? != GROUP_X25519 {
                    return Err(TlsError::Unsupported("key exchange group"));
                }
                let len = get_u16(payload, 2)? as usize;
                let key: [u8; 32] = take(payload, 4, len)?
                    .try_into()
                    .map_err(|_| TlsError::Decode)?;
                result.key_share = Some(key);
            }
            _ => {
                registry.dispatch(ty, payload)?;
            }
        }
    }
    Ok(result)
}

/// What the engine needs from EncryptedExtensions.
#[derive(Debug, Default)]
pub struct EncryptedExtensionsData {
    pub alpn: Option<Vec<u8>>,
}

pub fn parse_encrypted_extensions_data(
    data: &[u8],
    registry: &ExtensionRegistry,
) -> Result<EncryptedExtensionsData, TlsError> {
    let mut result = EncryptedExtensionsData::default();
    for ext in iter_extensions(data) {
        let (ty, payload) = ext?;
        match ty {
            EXT_ALPN => {
                // protocol_name_list with exactly one entry
                let list_len = get_u16(payload, 0)? as usize;
                let proto_len = *payload.get(2).ok_or(TlsError::Decode)? as usize;
                if list_len != 1 + proto_len {
                    return Err(TlsError::Decode);
                }
                result.alpn = Some(take(payload, 3, proto_len)?.to_vec());
            }
            // Acknowledgements of engine extensions (e.g. an empty SNI).
            t if ENGINE_EXTENSIONS.contains(&t) => {}
            _ => {
                registry.dispatch(ty, payload)?;
            }
        }
    }
    Ok(result)
}

/// Offer every extension of a CertificateEntry to the registry.
pub fn dispatch_certificate_extensions(
    data: &[u8],
    registry: &ExtensionRegistry,
) -> Result<(), TlsError> {
    for ext in iter_extensions(data) {
        let (ty, payload) = ext?;
        registry.dispatch(ty, payload)?;
    }
    Ok(())
}

// ---- server side (loopback servers and tests) ----

/// ClientHello extensions as seen by a server.
#[derive(Debug, Default)]
pub struct ClientHelloExtensions {
    pub server_name: Option<String>,
    pub x25519_share: Option<[u8; 32]>,
    pub alpn: Vec<Vec<u8>>,
    pub supports_tls13: bool,
    /// Every other extension, in order.
    pub other: Vec<(u16, Vec<u8>)>,
}

pub fn parse_client_hello_extensions(data: &[u8]) -> Result<ClientHelloExtensions, TlsError> {
    let mut result = ClientHelloExtensions::default();
    for ext in iter_extensions(data) {
        let (ty, payload) = ext?;
        match ty {
            EXT_SERVER_NAME => {
                let name_len = get_u16(payload, 3)? as usize;
                let name = take(payload, 5, name_len)?;
                result.server_name = Some(String::from_utf8_lossy(name).into_owned());
            }
            EXT_SUPPORTED_VERSIONS => {
                let list = take(payload, 1, *payload.first().ok_or(TlsError::Decode)? as usize)?;
                result.supports_tls13 = list.chunks_exact(2).any(|v| v == [0x03, 0x04]);
            }
            EXT_KEY_SHARE => {
                let shares_len = get_u16(payload, 0)? as usize;
                let mut shares = take(payload, 2, shares_len)?;
                while shares.len() >= 4 {
                    let group = get_u16(shares, 0)?;
                    let len = get_u16(shares, 2)? as usize;
                    let key = take(shares, 4, len)?;
                    if group == GROUP_X25519 {
                        result.x25519_share = key.try_into().ok();
                    }
                    shares = &shares[4 + len..];
                }
            }
            EXT_ALPN => {
                let list_len = get_u16(payload, 0)? as usize;
                let mut list = take(payload, 2, list_len)?;
                while let Some((&len, rest)) = list.split_first() {
                    let proto = take(rest, 0, len as usize)?;
                    result.alpn.push(proto.to_vec());
                    list = &rest[len as usize..];
                }
            }
            EXT_SUPPORTED_GROUPS | EXT_SIGNATURE_ALGORITHMS => {}
            _ => result.other.push((ty, payload.to_vec())),
        }
    }
    Ok(result)
}

pub fn encode_server_hello_extensions(x25519_public: &[u8; 32], out: &mut Vec<u8>) {
    put_extension(out, EXT_SUPPORTED_VERSIONS, &TLS13.to_be_bytes());
    let mut ks = Vec::with_capacity(36);
    put_u16(&mut ks, GROUP_X25519);
    put_u16(&mut ks, 32);
    ks.extend_from_slice(x25519_public);
    put_extension(out, EXT_KEY_SHARE, &ks);
}

/// Encode an EncryptedExtensions block: optional ALPN, then raw extras.
pub fn encode_encrypted_extensions_data(
    alpn: Option<&[u8]>,
    extra: &[(u16, &[u8])],
    out: &mut Vec<u8>,
) {
    if let Some(proto) = alpn {
        let mut body = Vec::with_capacity(3 + proto.len());
        put_u16(&mut body, (1 + proto.len()) as u16);
        body.push(proto.len() as u8);
        body.extend_from_slice(proto);
        put_extension(out, EXT_ALPN, &body);
    }
    for (ty, payload) in extra {
        put_extension(out, *ty, payload);
    }
}
