//! Trust store loading and chain verification through the public API.

use std::io::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use secure_fetch::crypto::signature::SigningKey;
use secure_fetch::x509::{Certificate, CertificateBuilder};
use secure_fetch::{Error, TrustStore, VerificationResult, VerifyError};

// ---------------------------------------------------------------------------
// Test infrastructure
// ---------------------------------------------------------------------------

fn pem(der: &[u8]) -> String {
    secure_fetch::ext::armor::encode("CERTIFICATE", der)
}

struct Chain {
    root: Vec<u8>,
    leaf: Vec<u8>,
}

fn chain() -> Chain {
    let root_key = SigningKey::ed25519_from_seed(&[1; 32]);
    let root = CertificateBuilder::new("Integration Root")
        .ca(true)
        .self_signed(&root_key);
    let leaf_key = SigningKey::p256_from_scalar(&[2; 32]).unwrap();
    let leaf = CertificateBuilder::new("www.example.test")
        .serial(&[9])
        .issued_by(&leaf_key, &Certificate::parse(&root).unwrap(), &root_key);
    Chain { root, leaf }
}

fn now() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[test]
fn loads_pem_bundle_from_disk() {
    let c = chain();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "# comment lines are ignored\n{}", pem(&c.root)).unwrap();

    let store = TrustStore::load(file.path()).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.verify(&[c.leaf], now()), VerificationResult::Ok);
}

#[test]
fn missing_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.pem");
    match TrustStore::load(&path) {
        Err(Error::TrustStoreLoad { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected TrustStoreLoad, got {other:?}"),
    }
}

#[test]
fn empty_or_garbled_bundle_fails_closed() {
    let mut empty = tempfile::NamedTempFile::new().unwrap();
    writeln!(empty, "no certificates here").unwrap();
    assert!(matches!(
        TrustStore::load(empty.path()),
        Err(Error::TrustStoreLoad { .. })
    ));

    let mut garbled = tempfile::NamedTempFile::new().unwrap();
    write!(
        garbled,
        "-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----\n"
    )
    .unwrap();
    assert!(matches!(
        TrustStore::load(garbled.path()),
        Err(Error::TrustStoreLoad { .. })
    ));
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[test]
fn unknown_issuer() {
    let c = chain();
    let other_key = SigningKey::ed25519_from_seed(&[7; 32]);
    let other_root = CertificateBuilder::new("Other Root")
        .ca(true)
        .self_signed(&other_key);
    let store = TrustStore::from_der([other_root]).unwrap();
    let result = store.verify(&[c.leaf], now());
    assert_eq!(
        result,
        VerificationResult::Failed(VerifyError::UnableToGetLocalIssuer)
    );
    assert_eq!(result.code(), 20);
}

#[test]
fn expired_leaf_reports_code_10() {
    let c = chain();
    let root_key = SigningKey::ed25519_from_seed(&[1; 32]);
    let leaf_key = SigningKey::ed25519_from_seed(&[3; 32]);
    let expired = CertificateBuilder::new("old.example.test")
        .validity(1_000_000_000, 1_100_000_000)
        .issued_by(&leaf_key, &Certificate::parse(&c.root).unwrap(), &root_key);
    let store = TrustStore::from_der([c.root]).unwrap();
    let result = store.verify(&[expired], now());
    assert_eq!(result.code(), 10);
    assert_eq!(
        result.error().unwrap().to_string(),
        "certificate has expired (code 10)"
    );
}

#[test]
fn verification_failed_error_displays_reason() {
    let err = Error::VerificationFailed(VerifyError::DepthZeroSelfSigned);
    assert_eq!(
        err.to_string(),
        "certificate verification error: self-signed certificate (code 18)"
    );
}
