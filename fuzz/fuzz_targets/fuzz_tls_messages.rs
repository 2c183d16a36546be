#![no_main]

use libfuzzer_sys::fuzz_target;
use secure_fetch::tls::extensions;
use secure_fetch::tls::messages::{self, HandshakeType};
use secure_fetch::ExtensionRegistry;

fuzz_target!(|data: &[u8]| {
    // Handshake parsers must reject, never panic.
    let registry = ExtensionRegistry::new();
    let Ok((msg_type, body_len)) = messages::read_handshake_header(data) else {
        return;
    };
    let Some(body) = data.get(4..4 + body_len) else {
        return;
    };

    match HandshakeType::from_u8(msg_type) {
        Some(HandshakeType::ClientHello) => {
            if let Ok(hello) = messages::parse_client_hello(body) {
                let _ = messages::iter_cipher_suites(hello.cipher_suites).count();
                let _ = extensions::parse_client_hello_extensions(hello.extensions);
            }
        }
        Some(HandshakeType::ServerHello) => {
            if let Ok(hello) = messages::parse_server_hello(body) {
                let _ = extensions::parse_server_hello_extensions(hello.extensions, &registry);
            }
        }
        Some(HandshakeType::EncryptedExtensions) => {
            if let Ok(exts) = messages::parse_encrypted_extensions(body) {
                let _ = extensions::parse_encrypted_extensions_data(exts, &registry);
            }
        }
        Some(HandshakeType::Certificate) => {
            if let Ok(cert) = messages::parse_certificate(body) {
                for entry in messages::iter_certificate_entries(cert.entries).flatten() {
                    let _ = extensions::dispatch_certificate_extensions(entry.extensions, &registry);
                }
            }
        }
        Some(HandshakeType::CertificateVerify) => {
            let _ = messages::parse_certificate_verify(body);
        }
        Some(HandshakeType::Finished) => {
            let _ = messages::parse_finished(body);
        }
        _ => {}
    }
});
