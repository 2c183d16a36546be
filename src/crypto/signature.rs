//! Signature verification for CertificateVerify and X.509 chains, plus the
//! signing half used to mint certificates and drive local test servers.
//!
//! Supported keys: Ed25519, ECDSA P-256 and RSA.

use rsa::pkcs1::DecodeRsaPublicKey;
use sha2::{Sha256, Sha384, Sha512};

/// TLS 1.3 SignatureScheme code points we offer in `signature_algorithms`.
pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;
pub const RSA_PSS_RSAE_SHA256: u16 = 0x0804;
pub const RSA_PSS_RSAE_SHA384: u16 = 0x0805;
pub const RSA_PSS_RSAE_SHA512: u16 = 0x0806;
pub const ED25519: u16 = 0x0807;
/// Only valid inside certificates, never in CertificateVerify.
pub const RSA_PKCS1_SHA256: u16 = 0x0401;
pub const RSA_PKCS1_SHA384: u16 = 0x0501;
pub const RSA_PKCS1_SHA512: u16 = 0x0601;

pub const OFFERED_SCHEMES: &[u16] = &[
    ED25519,
    ECDSA_SECP256R1_SHA256,
    RSA_PSS_RSAE_SHA256,
    RSA_PSS_RSAE_SHA384,
    RSA_PSS_RSAE_SHA512,
    RSA_PKCS1_SHA256,
    RSA_PKCS1_SHA384,
    RSA_PKCS1_SHA512,
];

const SERVER_CV_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// The key type and algorithm are not a combination we can check.
    Unsupported,
    Invalid,
}

/// Build the signed content of a server CertificateVerify (RFC 8446 §4.4.3):
/// 64 spaces, the context string, a zero byte, then the transcript hash.
pub fn server_certificate_verify_message(transcript_hash: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(64 + SERVER_CV_CONTEXT.len() + 1 + transcript_hash.len());
    msg.extend_from_slice(&[0x20; 64]);
    msg.extend_from_slice(SERVER_CV_CONTEXT);
    msg.push(0);
    msg.extend_from_slice(transcript_hash);
    msg
}

/// A subject public key taken from a certificate.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    P256(p256::ecdsa::VerifyingKey),
    Rsa(rsa::RsaPublicKey),
}

impl PublicKey {
    pub fn ed25519(raw: &[u8]) -> Result<Self, SignatureError> {
        let bytes: &[u8; 32] = raw.try_into().map_err(|_| SignatureError::Invalid)?;
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(Self::Ed25519)
            .map_err(|_| SignatureError::Invalid)
    }

    pub fn p256(sec1: &[u8]) -> Result<Self, SignatureError> {
        p256::ecdsa::VerifyingKey::from_sec1_bytes(sec1)
            .map(Self::P256)
            .map_err(|_| SignatureError::Invalid)
    }

    /// `der` is a PKCS#1 RSAPublicKey.
    pub fn rsa(der: &[u8]) -> Result<Self, SignatureError> {
        rsa::RsaPublicKey::from_pkcs1_der(der)
            .map(Self::Rsa)
            .map_err(|_| SignatureError::Invalid)
    }

    /// Verify `signature` over `message` using a TLS SignatureScheme.
    pub fn verify(&self, scheme: u16, message: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        match (self, scheme) {
            (Self::Ed25519(key), ED25519) => {
                let sig: &[u8; 64] = signature.try_into().map_err(|_| SignatureError::Invalid)?;
                ed25519_dalek::Verifier::verify(key, message, &ed25519_dalek::Signature::from_bytes(sig))
                    .map_err(|_| SignatureError::Invalid)
            }
            (Self::P256(key), ECDSA_SECP256R1_SHA256) => {
                let sig = p256::ecdsa::DerSignature::try_from(signature)
                    .map_err(|_| SignatureError::Invalid)?;
                p256::ecdsa::signature::Verifier::verify(key, message, &sig)
                    .map_err(|_| SignatureError::Invalid)
            }
            (Self::Rsa(key), RSA_PSS_RSAE_SHA256 | RSA_PSS_RSAE_SHA384 | RSA_PSS_RSAE_SHA512) => {
                verify_rsa_pss(key, scheme, message, signature)
            }
            (Self::Rsa(key), RSA_PKCS1_SHA256 | RSA_PKCS1_SHA384 | RSA_PKCS1_SHA512) => {
                verify_rsa_pkcs1(key, scheme, message, signature)
            }
            _ => Err(SignatureError::Unsupported),
        }
    }
}

fn verify_rsa_pss(
    key: &rsa::RsaPublicKey,
    scheme: u16,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    use rsa::pss::VerifyingKey;
    use rsa::signature::Verifier;

    let sig = rsa::pss::Signature::try_from(signature).map_err(|_| SignatureError::Invalid)?;
    let key = key.clone();
    let result = match scheme {
        RSA_PSS_RSAE_SHA256 => VerifyingKey::<Sha256>::new(key).verify(message, &sig),
        RSA_PSS_RSAE_SHA384 => VerifyingKey::<Sha384>::new(key).verify(message, &sig),
        RSA_PSS_RSAE_SHA512 => VerifyingKey::<Sha512>::new(key).verify(message, &sig),
        _ => return Err(SignatureError::Unsupported),
    };
    result.map_err(|_| SignatureError::Invalid)
}

fn verify_rsa_pkcs1(
    key: &rsa::RsaPublicKey,
    scheme: u16,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    use rsa::pkcs1v15::VerifyingKey;
    use rsa::signature::Verifier;

    let sig =
        rsa::pkcs1v15::Signature::try_from(signature).map_err(|_| SignatureError::Invalid)?;
    let key = key.clone();
    let result = match scheme {
        RSA_PKCS1_SHA256 => VerifyingKey::<Sha256>::new(key).verify(message, &sig),
        RSA_PKCS1_SHA384 => VerifyingKey::<Sha384>::new(key).verify(message, &sig),
        RSA_PKCS1_SHA512 => VerifyingKey::<Sha512>::new(key).verify(message, &sig),
        _ => return Err(SignatureError::Unsupported),
    };
    result.map_err(|_| SignatureError::Invalid)
}

/// Private key able to sign CertificateVerify messages and certificates.
pub enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    P256(p256::ecdsa::SigningKey),
}

impl SigningKey {
    pub fn ed25519_from_seed(seed: &[u8; 32]) -> Self {
        Self::Ed25519(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    pub fn p256_from_scalar(scalar: &[u8; 32]) -> Result<Self, SignatureError> {
        p256::ecdsa::SigningKey::from_slice(scalar)
            .map(Self::P256)
            .map_err(|_| SignatureError::Invalid)
    }

    pub fn scheme(&self) -> u16 {
        match self {
            Self::Ed25519(_) => ED25519,
            Self::P256(_) => ECDSA_SECP256R1_SHA256,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Ed25519(k) => PublicKey::Ed25519(k.verifying_key()),
            Self::P256(k) => PublicKey::P256(*k.verifying_key()),
        }
    }

    /// Raw public key bytes as carried in a SubjectPublicKeyInfo BIT STRING.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            Self::Ed25519(k) => k.verifying_key().to_bytes().to_vec(),
            Self::P256(k) => k.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// Ed25519 signatures are raw 64 bytes; ECDSA signatures are DER.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Ed25519(k) => ed25519_dalek::Signer::sign(k, message).to_bytes().to_vec(),
            Self::P256(k) => {
                let sig: p256::ecdsa::DerSignature =
                    p256::ecdsa::signature::Signer::sign(k, message);
                sig.as_bytes().to_vec()
            }
        }
    }
}
