//! Trust anchors and peer chain verification.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::crypto::signature::SignatureError;
use crate::error::{Error, Result};
use crate::ext::armor;
use crate::x509::Certificate;

/// Longest chain walked from the leaf before giving up.
pub const MAX_CHAIN_DEPTH: usize = 10;

/// Why a peer chain was not trusted. Codes follow X.509 verify numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    Unspecified,
    UnsupportedKey,
    SignatureFailure,
    NotYetValid,
    Expired,
    DepthZeroSelfSigned,
    SelfSignedInChain,
    UnableToGetLocalIssuer,
    ChainTooLong,
    InvalidCa,
    PathLengthExceeded,
    KeyUsageNoCertSign,
}

impl VerifyError {
    pub fn code(self) -> u32 {
        match self {
            Self::Unspecified => 1,
            Self::UnsupportedKey => 6,
            Self::SignatureFailure => 7,
            Self::NotYetValid => 9,
            Self::Expired => 10,
            Self::DepthZeroSelfSigned => 18,
            Self::SelfSignedInChain => 19,
            Self::UnableToGetLocalIssuer => 20,
            Self::ChainTooLong => 22,
            Self::InvalidCa => 24,
            Self::PathLengthExceeded => 25,
            Self::KeyUsageNoCertSign => 32,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified certificate verification error",
            Self::UnsupportedKey => "unable to decode public key",
            Self::SignatureFailure => "certificate signature failure",
            Self::NotYetValid => "certificate is not yet valid",
            Self::Expired => "certificate has expired",
            Self::DepthZeroSelfSigned => "self-signed certificate",
            Self::SelfSignedInChain => "self-signed certificate in certificate chain",
            Self::UnableToGetLocalIssuer => "unable to get local issuer certificate",
            Self::ChainTooLong => "certificate chain too long",
            Self::InvalidCa => "invalid CA certificate",
            Self::PathLengthExceeded => "path length constraint exceeded",
            Self::KeyUsageNoCertSign => "key usage does not include certificate signing",
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.reason(), self.code())
    }
}

impl From<SignatureError> for VerifyError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::Unsupported => Self::UnsupportedKey,
            SignatureError::Invalid => Self::SignatureFailure,
        }
    }
}

/// Outcome of checking the peer's chain against a [`TrustStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationResult {
    Ok,
    Failed(VerifyError),
}

impl VerificationResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// 0 for success, otherwise the failure's code.
    pub fn code(&self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Failed(e) => e.code(),
        }
    }

    pub fn error(&self) -> Option<VerifyError> {
        match self {
            Self::Ok => None,
            Self::Failed(e) => Some(*e),
        }
    }
}

impl From<std::result::Result<(), VerifyError>> for VerificationResult {
    fn from(r: std::result::Result<(), VerifyError>) -> Self {
        match r {
            Ok(()) => Self::Ok,
            Err(e) => Self::Failed(e),
        }
    }
}

/// Ordered set of trusted CA certificates. Immutable once loaded.
#[derive(Clone, Default)]
pub struct TrustStore {
    anchors: Vec<Vec<u8>>,
}

impl TrustStore {
    /// Load a PEM bundle. Fails closed: an unreadable file, a malformed
    /// block, an unparseable certificate or an empty bundle is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let store = fs::read_to_string(path)
            .and_then(|text| Self::from_pem(&text))
            .map_err(|source| Error::TrustStoreLoad {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), anchors = store.len(), "loaded trust store");
        Ok(store)
    }

    /// Parse `CERTIFICATE` blocks from PEM text; other labels are skipped.
    pub fn from_pem(text: &str) -> io::Result<Self> {
        let blocks = armor::decode_all(text).map_err(invalid_data)?;
        Self::from_der(
            blocks
                .into_iter()
                .filter(|b| b.label == "CERTIFICATE" || b.label == "X509 CERTIFICATE")
                .map(|b| b.data),
        )
    }

    pub fn from_der(certs: impl IntoIterator<Item = Vec<u8>>) -> io::Result<Self> {
        let mut anchors = Vec::new();
        for der in certs {
            Certificate::parse(&der).map_err(invalid_data)?;
            anchors.push(der);
        }
        if anchors.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "no certificates in trust store",
            ));
        }
        Ok(Self { anchors })
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Verify a presented chain (leaf first) at `now`.
    pub fn verify(&self, chain: &[Vec<u8>], now: SystemTime) -> VerificationResult {
        let now = match now.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        };
        let result = self.verify_at(chain, now);
        debug!(?result, depth = chain.len(), "verified peer chain");
        result.into()
    }

    fn verify_at(&self, chain: &[Vec<u8>], now: i64) -> std::result::Result<(), VerifyError> {
        let presented = chain
            .iter()
            .map(|der| Certificate::parse(der))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| VerifyError::Unspecified)?;
        let anchors = self
            .anchors
            .iter()
            .filter_map(|der| Certificate::parse(der).ok())
            .collect::<Vec<_>>();

        let mut current = presented.first().ok_or(VerifyError::Unspecified)?;
        let mut path = vec![current];
        loop {
            if let Some(anchor) = anchors.iter().find(|a| a.der() == current.der()) {
                return check_validity(&path[..path.len() - 1], anchor, now);
            }

            let mut anchor_error = None;
            for anchor in anchors.iter().filter(|a| a.subject() == current.issuer()) {
                let checked = anchor
                    .public_key()
                    .and_then(|key| current.verify_signed_by(&key));
                match checked {
                    Ok(()) => {
                        check_issuer(anchor, &path, Anchor::Trusted)?;
                        return check_validity(&path, anchor, now);
                    }
                    Err(e) => anchor_error = Some(VerifyError::from(e)),
                }
            }
            if let Some(e) = anchor_error {
                return Err(e);
            }

            if current.is_self_issued() {
                return Err(if path.len() == 1 {
                    VerifyError::DepthZeroSelfSigned
                } else {
                    VerifyError::SelfSignedInChain
                });
            }

            let issuer = presented[1..]
                .iter()
                .find(|c| c.subject() == current.issuer())
                .ok_or(VerifyError::UnableToGetLocalIssuer)?;
            let key = issuer.public_key()?;
            current.verify_signed_by(&key)?;
            check_issuer(issuer, &path, Anchor::Presented)?;
            if path.len() >= MAX_CHAIN_DEPTH {
                return Err(VerifyError::ChainTooLong);
            }
            path.push(issuer);
            current = issuer;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Trusted,
    Presented,
}

/// CA constraints on a certificate that signed the last entry of `below`.
///
/// A presented issuer must assert `cA`, or carry keyCertSign when it has
/// no basicConstraints at all. A trust anchor without basicConstraints is
/// accepted (v1 roots); one that denies `cA` is not.
fn check_issuer(
    issuer: &Certificate<'_>,
    below: &[&Certificate<'_>],
    kind: Anchor,
) -> std::result::Result<(), VerifyError> {
    match (issuer.basic_constraints(), issuer.key_usage()) {
        (Some(bc), _) if !bc.ca => return Err(VerifyError::InvalidCa),
        (None, None) if kind == Anchor::Presented => return Err(VerifyError::InvalidCa),
        _ => {}
    }
    if !issuer.allows_cert_sign() {
        return Err(VerifyError::KeyUsageNoCertSign);
    }
    if let Some(limit) = issuer.basic_constraints().and_then(|bc| bc.path_len) {
        let intermediates = below
            .iter()
            .skip(1)
            .filter(|c| !c.is_self_issued())
            .count();
        if intermediates as u64 > u64::from(limit) {
            return Err(VerifyError::PathLengthExceeded);
        }
    }
    Ok(())
}

fn check_validity(
    path: &[&Certificate<'_>],
    anchor: &Certificate<'_>,
    now: i64,
) -> std::result::Result<(), VerifyError> {
    for cert in path.iter().copied().chain(std::iter::once(anchor)) {
        if now < cert.not_before() {
            return Err(VerifyError::NotYetValid);
        }
        if now > cert.not_after() {
            return Err(VerifyError::Expired);
        }
    }
    Ok(())
}

fn invalid_data<E>(e: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustStore")
            .field("anchors", &self.anchors.len())
            .finish()
    }
}
