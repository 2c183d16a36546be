#![no_main]

use std::time::{Duration, UNIX_EPOCH};

use libfuzzer_sys::fuzz_target;
use secure_fetch::x509::Certificate;
use secure_fetch::TrustStore;

fuzz_target!(|data: &[u8]| {
    if let Ok(cert) = Certificate::parse(data) {
        let _ = cert.subject_common_name();
        let _ = cert.issuer_common_name();
        let _ = cert.public_key();
        // A parseable certificate can anchor a store and verify itself.
        if let Ok(store) = TrustStore::from_der([data.to_vec()]) {
            let _ = store.verify(&[data.to_vec()], UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        }
    }
});
