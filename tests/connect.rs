//! End-to-end exchanges over real sockets using only the public API.
//!
//! The servers here are plain `std::net` listeners: they either speak
//! plaintext or hang up, which is enough to drive every connect-phase
//! error path.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

use secure_fetch::crypto::signature::SigningKey;
use secure_fetch::x509::CertificateBuilder;
use secure_fetch::{
    fetch, http_get, Endpoint, Error, ExchangePolicy, ExtensionRegistry, HandshakeFailure, Port,
    SessionConfig, SessionContext, SessionState,
};

// ---------------------------------------------------------------------------
// Test infrastructure
// ---------------------------------------------------------------------------

/// An endpoint nothing listens on.
fn refused_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Endpoint::new("127.0.0.1", Port::Number(port))
}

/// Accept one connection, read the request head, send `response` and hang
/// up. Returns what the client sent.
fn plain_server(response: &'static [u8]) -> (Endpoint, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = Endpoint::new("127.0.0.1", Port::Number(listener.local_addr().unwrap().port()));
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        while !received.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        stream.write_all(response).unwrap();
        received
    });
    (endpoint, handle)
}

/// Accept one connection, swallow the ClientHello and hang up.
fn hangup_server() -> (Endpoint, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = Endpoint::new("127.0.0.1", Port::Number(listener.local_addr().unwrap().port()));
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf);
    });
    (endpoint, handle)
}

fn ca_bundle() -> tempfile::NamedTempFile {
    let key = SigningKey::ed25519_from_seed(&[5; 32]);
    let root = CertificateBuilder::new("Connect Test Root")
        .ca(true)
        .self_signed(&key);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(secure_fetch::ext::armor::encode("CERTIFICATE", &root).as_bytes())
        .unwrap();
    file
}

// ---------------------------------------------------------------------------
// Connect-phase failures
// ---------------------------------------------------------------------------

#[test]
fn refused_connection_writes_nothing() {
    let bundle = ca_bundle();
    let endpoint = refused_endpoint();
    let mut sink = Vec::new();
    let err = fetch(
        SessionConfig::default().with_ca_file(bundle.path()),
        ExtensionRegistry::new(),
        &endpoint,
        &http_get("127.0.0.1", "/"),
        &mut sink,
        &ExchangePolicy::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Connect { .. }), "{err:?}");
    assert!(err.is_connect_phase());
    assert!(sink.is_empty());
}

#[test]
fn missing_trust_store_fails_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = Vec::new();
    let err = fetch(
        SessionConfig::default().with_ca_file(dir.path().join("none.pem")),
        ExtensionRegistry::new(),
        &refused_endpoint(),
        b"GET / HTTP/1.1\r\n\r\n",
        &mut sink,
        &ExchangePolicy::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::TrustStoreLoad { .. }), "{err:?}");
    assert!(sink.is_empty());
}

#[test]
fn server_hanging_up_mid_handshake() {
    let bundle = ca_bundle();
    let (endpoint, server) = hangup_server();
    let ctx = SessionContext::new(
        SessionConfig::default().with_ca_file(bundle.path()),
        ExtensionRegistry::new(),
    )
    .unwrap();
    let mut session = ctx.session();
    let err = session.connect(&endpoint).unwrap_err();
    assert!(
        matches!(
            err,
            Error::Handshake(HandshakeFailure::Eof | HandshakeFailure::Io(_))
        ),
        "{err:?}"
    );
    assert_eq!(session.state(), SessionState::Failed);
    session.close();
    assert_eq!(session.state(), SessionState::Failed);
    server.join().unwrap();
}

// ---------------------------------------------------------------------------
// Plaintext exchanges
// ---------------------------------------------------------------------------

#[test]
fn plaintext_fetch_forwards_exact_bytes() {
    const BODY: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    let (endpoint, server) = plain_server(BODY);
    let request = http_get("127.0.0.1", "/status");
    let mut sink = Vec::new();
    let report = fetch(
        SessionConfig::plaintext(),
        ExtensionRegistry::new(),
        &endpoint,
        &request,
        &mut sink,
        &ExchangePolicy {
            read_buffer: 7,
            ..ExchangePolicy::default()
        },
    )
    .unwrap();

    assert_eq!(sink, BODY);
    assert!(report.completed());
    assert!(report.verification.is_none());
    assert_eq!(report.bytes_sent, request.len());
    assert_eq!(report.bytes_received, BODY.len());
    assert_eq!(server.join().unwrap(), request);
}

#[test]
fn closed_session_refuses_io() {
    let (endpoint, server) = plain_server(b"bye");
    let ctx = SessionContext::new(SessionConfig::plaintext(), ExtensionRegistry::new()).unwrap();
    let mut session = ctx.connect(&endpoint).unwrap();
    assert_eq!(session.state(), SessionState::Established);
    session.write(b"PING\r\n\r\n").unwrap();
    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);

    assert!(matches!(
        session.read(&mut [0u8; 8]),
        Err(Error::InvalidState {
            op: "read",
            state: SessionState::Closed
        })
    ));
    assert!(matches!(
        session.write(b"x"),
        Err(Error::InvalidState { op: "write", .. })
    ));
    drop(session);
    let _ = server.join();
}

#[test]
fn unconnected_session_refuses_io() {
    let ctx = SessionContext::new(SessionConfig::plaintext(), ExtensionRegistry::new()).unwrap();
    let mut session = ctx.session();
    assert_eq!(session.state(), SessionState::Unconnected);
    assert!(matches!(
        session.write(b"x"),
        Err(Error::InvalidState {
            state: SessionState::Unconnected,
            ..
        })
    ));
}
