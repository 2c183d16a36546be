//! HKDF-Expand-Label and traffic key derivation (RFC 8446 §7.1, §7.3).

use heapless::Vec as HVec;

use crate::crypto::Hkdf;
use crate::error::TlsError;

const LABEL_PREFIX: &[u8] = b"tls13 ";

/// HKDF-Expand-Label(secret, label, context, out.len()).
///
/// ```text
/// struct {
///     uint16 length = out.len();
///     opaque label<7..255> = "tls13 " + label;
///     opaque context<0..255> = context;
/// } HkdfLabel;
/// ```
pub fn hkdf_expand_label<H: Hkdf>(
    hkdf: &H,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) -> Result<(), TlsError> {
    let mut info: HVec<u8, 128> = HVec::new();
    let full_label_len = LABEL_PREFIX.len() + label.len();
    if full_label_len > 255 || context.len() > 255 || out.len() > u16::MAX as usize {
        return Err(TlsError::Crypto);
    }
    let overflow = |_| TlsError::BufferTooSmall {
        needed: 4 + full_label_len + context.len(),
    };
    info.extend_from_slice(&(out.len() as u16).to_be_bytes())
        .map_err(overflow)?;
    info.push(full_label_len as u8).map_err(|_| TlsError::Crypto)?;
    info.extend_from_slice(LABEL_PREFIX).map_err(overflow)?;
    info.extend_from_slice(label).map_err(overflow)?;
    info.push(context.len() as u8).map_err(|_| TlsError::Crypto)?;
    info.extend_from_slice(context).map_err(overflow)?;

    hkdf.expand(secret, &info, out)
}

/// Record protection key and IV for one direction.
pub struct TrafficKeys {
    pub key: HVec<u8, 32>,
    pub iv: [u8; 12],
}

/// Derive the write key (`key_len` bytes) and IV from a traffic secret.
pub fn derive_traffic_keys<H: Hkdf>(
    hkdf: &H,
    secret: &[u8],
    key_len: usize,
) -> Result<TrafficKeys, TlsError> {
    let mut key: HVec<u8, 32> = HVec::new();
    key.resize(key_len, 0)
        .map_err(|_| TlsError::BufferTooSmall { needed: key_len })?;
    hkdf_expand_label(hkdf, secret, b"key", &[], &mut key)?;
    let mut iv = [0u8; 12];
    hkdf_expand_label(hkdf, secret, b"iv", &[], &mut iv)?;
    Ok(TrafficKeys { key, iv })
}
