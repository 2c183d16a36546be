//! Minting small X.509 v3 certificates (Ed25519 or P-256 keys).
//!
//! Used to provision trust anchors and server chains for loopback servers;
//! names carry a single commonName.

use super::der::{self, explicit, TAG_BOOLEAN, TAG_OCTET_STRING, TAG_OID, TAG_SET, TAG_UTF8_STRING};
use super::{
    BasicConstraints, Certificate, OID_BASIC_CONSTRAINTS, OID_COMMON_NAME, OID_EC_PUBLIC_KEY,
    OID_ECDSA_WITH_SHA256, OID_ED25519, OID_KEY_USAGE, OID_PRIME256V1,
};
use crate::crypto::signature::SigningKey;

/// 2100-01-01T00:00:00Z
const FAR_FUTURE: i64 = 4_102_444_800;

#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    common_name: String,
    serial: Vec<u8>,
    not_before: i64,
    not_after: i64,
    basic_constraints: Option<BasicConstraints>,
    key_usage: Option<u8>,
}

impl CertificateBuilder {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            serial: vec![1],
            not_before: 0,
            not_after: FAR_FUTURE,
            basic_constraints: Some(BasicConstraints {
                ca: false,
                path_len: None,
            }),
            key_usage: None,
        }
    }

    /// Validity window in Unix seconds.
    pub fn validity(mut self, not_before: i64, not_after: i64) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    pub fn serial(mut self, serial: &[u8]) -> Self {
        self.serial = serial.to_vec();
        self
    }

    pub fn ca(mut self, ca: bool) -> Self {
        let path_len = self.basic_constraints.and_then(|bc| bc.path_len);
        self.basic_constraints = Some(BasicConstraints { ca, path_len });
        self
    }

    /// Mark as a CA allowing at most `n` intermediates below it.
    pub fn path_len(mut self, n: u32) -> Self {
        self.basic_constraints = Some(BasicConstraints {
            ca: true,
            path_len: Some(n),
        });
        self
    }

    /// Leave out basicConstraints entirely.
    pub fn without_basic_constraints(mut self) -> Self {
        self.basic_constraints = None;
        self
    }

    /// keyUsage bits, e.g. [`super::KEY_USAGE_KEY_CERT_SIGN`].
    pub fn key_usage(mut self, bits: u8) -> Self {
        self.key_usage = Some(bits);
        self
    }

    pub fn self_signed(&self, key: &SigningKey) -> Vec<u8> {
        let name = encode_name(&self.common_name);
        self.sign(key, &name, key)
    }

    /// Certificate for `subject_key`, issued by `issuer` whose private key
    /// is `issuer_key`.
    pub fn issued_by(
        &self,
        subject_key: &SigningKey,
        issuer: &Certificate<'_>,
        issuer_key: &SigningKey,
    ) -> Vec<u8> {
        self.sign(subject_key, issuer.subject(), issuer_key)
    }

    fn sign(&self, subject_key: &SigningKey, issuer_name: &[u8], issuer_key: &SigningKey) -> Vec<u8> {
        let sig_alg = signature_algorithm(issuer_key);
        let version = der::tlv(explicit(0), &der::integer(&[2]));
        let validity = der::sequence(&[
            &der::generalized_time(self.not_before),
            &der::generalized_time(self.not_after),
        ]);
        let tbs = der::sequence(&[
            &version,
            &der::integer(&self.serial),
            &sig_alg,
            issuer_name,
            &validity,
            &encode_name(&self.common_name),
            &subject_public_key_info(subject_key),
            &self.extensions(),
        ]);
        let signature = issuer_key.sign(&tbs);
        der::sequence(&[&tbs, &sig_alg, &der::bit_string(&signature)])
    }

    /// The `[3]` extensions field, or nothing when no extension is set.
    fn extensions(&self) -> Vec<u8> {
        let mut list = Vec::new();
        if let Some(bc) = self.basic_constraints {
            let mut fields = Vec::new();
            if bc.ca {
                fields.extend(der::tlv(TAG_BOOLEAN, &[0xff]));
            }
            if let Some(n) = bc.path_len {
                fields.extend(der::integer(&n.to_be_bytes()));
            }
            list.extend(extension(OID_BASIC_CONSTRAINTS, &der::tlv(der::TAG_SEQUENCE, &fields)));
        }
        if let Some(bits) = self.key_usage {
            list.extend(extension(OID_KEY_USAGE, &der::bit_string(&[bits])));
        }
        if list.is_empty() {
            return Vec::new();
        }
        der::tlv(explicit(3), &der::tlv(der::TAG_SEQUENCE, &list))
    }
}

fn extension(oid: &[u8], value: &[u8]) -> Vec<u8> {
    der::sequence(&[
        &der::tlv(TAG_OID, oid),
        &der::tlv(TAG_BOOLEAN, &[0xff]),
        &der::tlv(TAG_OCTET_STRING, value),
    ])
}

fn encode_name(common_name: &str) -> Vec<u8> {
    let atv = der::sequence(&[
        &der::tlv(TAG_OID, OID_COMMON_NAME),
        &der::tlv(TAG_UTF8_STRING, common_name.as_bytes()),
    ]);
    der::sequence(&[&der::tlv(TAG_SET, &atv)])
}

fn signature_algorithm(key: &SigningKey) -> Vec<u8> {
    match key {
        SigningKey::Ed25519(_) => der::sequence(&[&der::tlv(TAG_OID, OID_ED25519)]),
        SigningKey::P256(_) => der::sequence(&[&der::tlv(TAG_OID, OID_ECDSA_WITH_SHA256)]),
    }
}

fn subject_public_key_info(key: &SigningKey) -> Vec<u8> {
    let alg = match key {
        SigningKey::Ed25519(_) => der::sequence(&[&der::tlv(TAG_OID, OID_ED25519)]),
        SigningKey::P256(_) => der::sequence(&[
            &der::tlv(TAG_OID, OID_EC_PUBLIC_KEY),
            &der::tlv(TAG_OID, OID_PRIME256V1),
        ]),
    };
    der::sequence(&[&alg, &der::bit_string(&key.public_key_bytes())])
}
