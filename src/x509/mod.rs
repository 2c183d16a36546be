//! X.509 certificate parsing: the fields chain verification needs.
//!
//! ```text
//! Certificate ::= SEQUENCE {
//!     tbsCertificate       TBSCertificate,
//!     signatureAlgorithm   AlgorithmIdentifier,
//!     signatureValue       BIT STRING }
//! ```

pub mod builder;
pub mod der;

pub use builder::CertificateBuilder;
pub use der::DerError;

use crate::crypto::signature::{self, PublicKey};
use der::{
    explicit, Reader, TAG_BIT_STRING, TAG_BOOLEAN, TAG_INTEGER, TAG_OCTET_STRING, TAG_OID,
    TAG_SEQUENCE,
};

// OID contents (without tag and length).
pub(crate) const OID_RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
pub(crate) const OID_SHA256_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
pub(crate) const OID_SHA384_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0c];
pub(crate) const OID_SHA512_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0d];
pub(crate) const OID_EC_PUBLIC_KEY: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
pub(crate) const OID_PRIME256V1: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
pub(crate) const OID_ECDSA_WITH_SHA256: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
pub(crate) const OID_ED25519: &[u8] = &[0x2b, 0x65, 0x70];
pub(crate) const OID_COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];
pub(crate) const OID_BASIC_CONSTRAINTS: &[u8] = &[0x55, 0x1d, 0x13];
pub(crate) const OID_KEY_USAGE: &[u8] = &[0x55, 0x1d, 0x0f];

/// keyUsage bits in the first content byte (RFC 5280 §4.2.1.3).
pub const KEY_USAGE_DIGITAL_SIGNATURE: u8 = 0x80;
pub const KEY_USAGE_KEY_CERT_SIGN: u8 = 0x04;
pub const KEY_USAGE_CRL_SIGN: u8 = 0x02;

/// The basicConstraints extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicConstraints {
    pub ca: bool,
    /// Most non-self-issued intermediates allowed below this CA.
    pub path_len: Option<u32>,
}

/// A parsed certificate borrowing its DER encoding.
#[derive(Debug, Clone)]
pub struct Certificate<'a> {
    der: &'a [u8],
    tbs: &'a [u8],
    serial: &'a [u8],
    issuer: &'a [u8],
    subject: &'a [u8],
    not_before: i64,
    not_after: i64,
    key_algorithm: &'a [u8],
    key_parameters: Option<&'a [u8]>,
    key_bytes: &'a [u8],
    basic_constraints: Option<BasicConstraints>,
    /// First byte of keyUsage; `None` when the extension is absent.
    key_usage: Option<u8>,
    signature_algorithm: &'a [u8],
    signature: &'a [u8],
}

impl<'a> Certificate<'a> {
    pub fn parse(der: &'a [u8]) -> Result<Self, DerError> {
        let mut outer = Reader::new(der);
        let mut cert = outer.sequence()?;
        outer.finish()?;

        let tbs_tlv = cert.read(TAG_SEQUENCE)?;
        let mut sig_alg = cert.sequence()?;
        let signature_algorithm = sig_alg.read(TAG_OID)?.content;
        let signature = cert.bit_string()?;
        cert.finish()?;

        let mut tbs = Reader::new(tbs_tlv.content);
        if let Some(version) = tbs.read_optional(explicit(0))? {
            let v = Reader::new(version.content).read(TAG_INTEGER)?.content;
            if v != [2] {
                return Err(DerError::Invalid("certificate version"));
            }
        }
        let serial = tbs.read(TAG_INTEGER)?.content;
        let inner_alg = tbs.sequence()?.read(TAG_OID)?.content;
        if inner_alg != signature_algorithm {
            return Err(DerError::Invalid("mismatched signature algorithms"));
        }
        let issuer = tbs.read(TAG_SEQUENCE)?.raw;

        let mut validity = tbs.sequence()?;
        let not_before = der::parse_time(&validity.read_any()?)?;
        let not_after = der::parse_time(&validity.read_any()?)?;
        validity.finish()?;

        let subject = tbs.read(TAG_SEQUENCE)?.raw;

        let mut spki = tbs.sequence()?;
        let mut alg = spki.sequence()?;
        let key_algorithm = alg.read(TAG_OID)?.content;
        let key_parameters = if alg.is_empty() {
            None
        } else {
            Some(alg.read_any()?.content)
        };
        let key_bytes = spki.bit_string()?;

        let mut extensions = Extensions::default();
        // issuerUniqueID [1] and subjectUniqueID [2] are skipped.
        while let Some(tag) = tbs.peek_tag() {
            let field = tbs.read_any()?;
            if tag == explicit(3) {
                extensions = parse_extensions(field.content)?;
            }
        }

        Ok(Self {
            der,
            tbs: tbs_tlv.raw,
            serial,
            issuer,
            subject,
            not_before,
            not_after,
            key_algorithm,
            key_parameters,
            key_bytes,
            basic_constraints: extensions.basic_constraints,
            key_usage: extensions.key_usage,
            signature_algorithm,
            signature,
        })
    }

    pub fn der(&self) -> &'a [u8] {
        self.der
    }

    pub fn serial(&self) -> &'a [u8] {
        self.serial
    }

    /// Encoded issuer Name, compared byte-for-byte against subjects.
    pub fn issuer(&self) -> &'a [u8] {
        self.issuer
    }

    pub fn subject(&self) -> &'a [u8] {
        self.subject
    }

    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// `cA` from basicConstraints; `None` when the extension is absent.
    pub fn is_ca(&self) -> Option<bool> {
        self.basic_constraints.map(|bc| bc.ca)
    }

    pub fn basic_constraints(&self) -> Option<BasicConstraints> {
        self.basic_constraints
    }

    pub fn key_usage(&self) -> Option<u8> {
        self.key_usage
    }

    /// A missing keyUsage extension places no restriction.
    pub fn allows_cert_sign(&self) -> bool {
        self.key_usage
            .map_or(true, |bits| bits & KEY_USAGE_KEY_CERT_SIGN != 0)
    }

    pub fn is_self_issued(&self) -> bool {
        self.issuer == self.subject
    }

    pub fn subject_common_name(&self) -> Option<String> {
        common_name(self.subject)
    }

    pub fn issuer_common_name(&self) -> Option<String> {
        common_name(self.issuer)
    }

    /// The subject public key, if it is a type we can verify with.
    pub fn public_key(&self) -> Result<PublicKey, signature::SignatureError> {
        match self.key_algorithm {
            OID_ED25519 => PublicKey::ed25519(self.key_bytes),
            OID_EC_PUBLIC_KEY if self.key_parameters == Some(OID_PRIME256V1) => {
                PublicKey::p256(self.key_bytes)
            }
            OID_RSA_ENCRYPTION => PublicKey::rsa(self.key_bytes),
            _ => Err(signature::SignatureError::Unsupported),
        }
    }

    /// Check this certificate's signature with the issuer's key.
    pub fn verify_signed_by(&self, issuer_key: &PublicKey) -> Result<(), signature::SignatureError> {
        let scheme = match self.signature_algorithm {
            OID_ED25519 => signature::ED25519,
            OID_ECDSA_WITH_SHA256 => signature::ECDSA_SECP256R1_SHA256,
            OID_SHA256_WITH_RSA => signature::RSA_PKCS1_SHA256,
            OID_SHA384_WITH_RSA => signature::RSA_PKCS1_SHA384,
            OID_SHA512_WITH_RSA => signature::RSA_PKCS1_SHA512,
            _ => return Err(signature::SignatureError::Unsupported),
        };
        issuer_key.verify(scheme, self.tbs, self.signature)
    }
}

#[derive(Default)]
struct Extensions {
    basic_constraints: Option<BasicConstraints>,
    key_usage: Option<u8>,
}

fn parse_extensions(extensions: &[u8]) -> Result<Extensions, DerError> {
    let mut found = Extensions::default();
    let mut list = Reader::new(extensions).sequence()?;
    while !list.is_empty() {
        let mut ext = list.sequence()?;
        let oid = ext.read(TAG_OID)?.content;
        ext.read_optional(TAG_BOOLEAN)?; // critical
        let value = ext.read(TAG_OCTET_STRING)?.content;
        match oid {
            OID_BASIC_CONSTRAINTS => found.basic_constraints = Some(parse_basic_constraints(value)?),
            OID_KEY_USAGE => found.key_usage = Some(parse_key_usage(value)?),
            _ => {}
        }
    }
    Ok(found)
}

fn parse_basic_constraints(value: &[u8]) -> Result<BasicConstraints, DerError> {
    let mut bc = Reader::new(value).sequence()?;
    let ca = match bc.read_optional(TAG_BOOLEAN)? {
        Some(b) => b.content.first().is_some_and(|&v| v != 0),
        None => false,
    };
    let path_len = bc
        .read_optional(TAG_INTEGER)?
        .map(|n| small_unsigned(n.content))
        .transpose()?;
    bc.finish()?;
    Ok(BasicConstraints { ca, path_len })
}

/// Non-negative INTEGER, saturating at `u32::MAX`.
fn small_unsigned(content: &[u8]) -> Result<u32, DerError> {
    match content.first() {
        None => Err(DerError::Invalid("empty integer")),
        Some(&b) if b & 0x80 != 0 => Err(DerError::Invalid("negative path length")),
        Some(_) => {
            let digits = content.iter().skip_while(|&&b| b == 0).count();
            if digits > 4 {
                return Ok(u32::MAX);
            }
            Ok(content.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
        }
    }
}

fn parse_key_usage(value: &[u8]) -> Result<u8, DerError> {
    let bits = Reader::new(value).read(TAG_BIT_STRING)?.content;
    match bits {
        [unused, ..] if *unused > 7 => Err(DerError::Invalid("bit string")),
        [_] => Ok(0),
        [unused, first, ..] => {
            // Unused bits only mask the last byte.
            let mask = if bits.len() == 2 { 0xffu8 << *unused } else { 0xff };
            Ok(first & mask)
        }
        [] => Err(DerError::Invalid("bit string")),
    }
}

/// First commonName in an encoded Name.
fn common_name(name: &[u8]) -> Option<String> {
    let mut rdns = Reader::new(name).sequence().ok()?;
    while let Ok(set) = rdns.read(der::TAG_SET) {
        let mut atvs = Reader::new(set.content);
        while let Ok(mut atv) = atvs.sequence() {
            let oid = atv.read(TAG_OID).ok()?;
            let value = atv.read_any().ok()?;
            if oid.content == OID_COMMON_NAME {
                return Some(String::from_utf8_lossy(value.content).into_owned());
            }
        }
    }
    None
}
