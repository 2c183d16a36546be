//! Loopback TLS 1.3 server used by the in-crate tests.
//!
//! [`ServerFlight`] computes a server's answer to a ClientHello without any
//! framing, [`ServerConnection`] adds the record layer on top, and
//! [`LoopbackServer`] runs one connection over a real TCP socket on a
//! background thread.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::crypto::rustcrypto::HkdfSha256;
use crate::crypto::signature::{self, SigningKey};
use crate::endpoint::{Endpoint, Port};
use crate::error::TlsError;
use crate::ext::ExtensionRecord;
use crate::tcp_tls::record::{
    self, ContentType, RecordProtection, CHANGE_CIPHER_SPEC, MAX_FRAGMENT, RECORD_HEADER_LEN,
};
use crate::tls::alert::{AlertDescription, LEVEL_WARNING};
use crate::tls::extensions::{
    encode_encrypted_extensions_data, encode_server_hello_extensions, parse_client_hello_extensions,
    ClientHelloExtensions,
};
use crate::tls::handshake::next_traffic_secret;
use crate::tls::key_schedule_tls::{TlsKeySchedule, TrafficSecrets};
use crate::tls::messages::{
    encode_certificate, encode_certificate_verify, encode_encrypted_extensions, encode_finished,
    encode_handshake, encode_server_hello, iter_cipher_suites, parse_client_hello, parse_finished,
    read_handshake_header, CipherSuite, HandshakeType,
};
use crate::tls::transcript::TranscriptHash;
use crate::trust::TrustStore;
use crate::x509::{Certificate, CertificateBuilder};

pub struct TestServerConfig {
    pub key: SigningKey,
    /// Leaf first.
    pub chain: Vec<Vec<u8>>,
    pub suite: CipherSuite,
    pub random: [u8; 32],
    pub x25519_secret: [u8; 32],
    /// Protocols the server is willing to select, in preference order.
    pub alpn: Vec<Vec<u8>>,
    pub server_hello_extensions: Vec<(u16, Vec<u8>)>,
    pub encrypted_extensions: Vec<(u16, Vec<u8>)>,
    /// Extensions attached to the leaf certificate entry.
    pub certificate_extensions: Vec<(u16, Vec<u8>)>,
    pub corrupt_certificate_verify: bool,
    pub request_client_certificate: bool,
}

impl TestServerConfig {
    /// Self-signed Ed25519 leaf for `common_name`.
    pub fn ed25519(common_name: &str) -> Self {
        let key = SigningKey::ed25519_from_seed(&[0x07; 32]);
        let leaf = CertificateBuilder::new(common_name).self_signed(&key);
        Self::with_chain(key, vec![leaf])
    }

    pub fn with_chain(key: SigningKey, chain: Vec<Vec<u8>>) -> Self {
        Self {
            key,
            chain,
            suite: CipherSuite::TlsAes128GcmSha256,
            random: [0x5e; 32],
            x25519_secret: [0x3c; 32],
            alpn: vec![b"http/1.1".to_vec()],
            server_hello_extensions: Vec::new(),
            encrypted_extensions: Vec::new(),
            certificate_extensions: Vec::new(),
            corrupt_certificate_verify: false,
            request_client_certificate: false,
        }
    }
}

/// A root CA able to issue server chains.
pub struct TestPki {
    root_key: SigningKey,
    pub root: Vec<u8>,
}

impl TestPki {
    pub fn new() -> Self {
        let root_key = SigningKey::ed25519_from_seed(&[0x11; 32]);
        let root = CertificateBuilder::new("Loopback Test Root")
            .ca(true)
            .self_signed(&root_key);
        Self { root_key, root }
    }

    /// P-256 leaf for `common_name`, issued by the root.
    pub fn server(&self, common_name: &str) -> TestServerConfig {
        self.server_with(CertificateBuilder::new(common_name).serial(&[2]))
    }

    pub fn server_with(&self, builder: CertificateBuilder) -> TestServerConfig {
        let key = SigningKey::p256_from_scalar(&[0x22; 32]).unwrap();
        let root = Certificate::parse(&self.root).unwrap();
        let leaf = builder.issued_by(&key, &root, &self.root_key);
        TestServerConfig::with_chain(key, vec![leaf])
    }

    pub fn trust_store(&self) -> TrustStore {
        TrustStore::from_der([self.root.clone()]).unwrap()
    }
}

/// A server's complete answer to one ClientHello.
pub struct ServerFlight {
    /// The ServerHello handshake message, sent in plaintext.
    pub server_hello: Vec<u8>,
    /// EncryptedExtensions, [CertificateRequest], Certificate,
    /// CertificateVerify and Finished, concatenated.
    pub encrypted: Vec<u8>,
    pub handshake: TrafficSecrets,
    pub application: TrafficSecrets,
    key_schedule: TlsKeySchedule<HkdfSha256>,
    transcript: TranscriptHash,
}

impl ServerFlight {
    /// `client_hello` is the full handshake message, header included.
    pub fn respond(config: &TestServerConfig, client_hello: &[u8]) -> Result<Self, TlsError> {
        let (ty, len) = read_handshake_header(client_hello)?;
        if ty != HandshakeType::ClientHello as u8 || client_hello.len() != len + 4 {
            return Err(TlsError::UnexpectedMessage(ty));
        }
        let ch = parse_client_hello(&client_hello[4..])?;
        let ext = parse_client_hello_extensions(ch.extensions)?;
        if !ext.supports_tls13 {
            return Err(TlsError::Unsupported("protocol version"));
        }
        if !iter_cipher_suites(ch.cipher_suites).any(|s| s == config.suite.to_u16()) {
            return Err(TlsError::Unsupported("cipher suite"));
        }
        let client_share = ext.x25519_share.ok_or(TlsError::Unsupported("key share"))?;

        let secret = x25519_dalek::StaticSecret::from(config.x25519_secret);
        let public = x25519_dalek::PublicKey::from(&secret);
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(client_share));

        let mut transcript = TranscriptHash::new();
        transcript.update(client_hello);

        let mut sh_ext = Vec::new();
        encode_server_hello_extensions(public.as_bytes(), &mut sh_ext);
        for (ty, payload) in &config.server_hello_extensions {
            encode_raw_extension(*ty, payload, &mut sh_ext)?;
        }
        let mut server_hello = Vec::new();
        encode_server_hello(&config.random, ch.session_id, config.suite, &sh_ext, &mut server_hello);
        transcript.update(&server_hello);

        let key_schedule = TlsKeySchedule::new(HkdfSha256, shared.as_bytes())?;
        let handshake = key_schedule.handshake_traffic_secrets(&transcript.current_hash())?;

        let mut encrypted = Vec::new();
        let mut push = |msg: Vec<u8>, transcript: &mut TranscriptHash| {
            transcript.update(&msg);
            encrypted.extend_from_slice(&msg);
        };

        let selected = config
            .alpn
            .iter()
            .find(|p| ext.alpn.contains(p))
            .map(Vec::as_slice);
        let extra: Vec<(u16, &[u8])> = config
            .encrypted_extensions
            .iter()
            .map(|(t, p)| (*t, p.as_slice()))
            .collect();
        let mut ee_data = Vec::new();
        encode_encrypted_extensions_data(selected, &extra, &mut ee_data);
        let mut ee = Vec::new();
        encode_encrypted_extensions(&ee_data, &mut ee);
        push(ee, &mut transcript);

        if config.request_client_certificate {
            // Empty context, signature_algorithms = [ed25519].
            let body = [0, 0, 8, 0, 13, 0, 4, 0, 2, 0x08, 0x07];
            let mut cr = Vec::new();
            encode_handshake(HandshakeType::CertificateRequest, &body, &mut cr);
            push(cr, &mut transcript);
        }

        let mut leaf_ext = Vec::new();
        for (ty, payload) in &config.certificate_extensions {
            encode_raw_extension(*ty, payload, &mut leaf_ext)?;
        }
        let entries: Vec<(&[u8], &[u8])> = config
            .chain
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_slice(), if i == 0 { &leaf_ext[..] } else { &[][..] }))
            .collect();
        let mut cert = Vec::new();
        encode_certificate(&entries, &mut cert);
        push(cert, &mut transcript);

        let content = signature::server_certificate_verify_message(&transcript.current_hash());
        let mut sig = config.key.sign(&content);
        if config.corrupt_certificate_verify {
            if let Some(last) = sig.last_mut() {
                *last ^= 0x01;
            }
        }
        let mut cv = Vec::new();
        encode_certificate_verify(config.key.scheme(), &sig, &mut cv);
        push(cv, &mut transcript);

        let verify = key_schedule.finished_verify_data(&handshake.server, &transcript.current_hash())?;
        let mut fin = Vec::new();
        encode_finished(&verify, &mut fin);
        push(fin, &mut transcript);

        let application = key_schedule.application_traffic_secrets(&transcript.current_hash())?;

        Ok(Self {
            server_hello,
            encrypted,
            handshake,
            application,
            key_schedule,
            transcript,
        })
    }

    pub fn check_client_finished(&self, finished: &[u8]) -> Result<(), TlsError> {
        self.check_client_finished_after::<&[u8]>(&[], finished)
    }

    /// Check the client Finished when `preceding` client messages (an
    /// empty Certificate) came before it.
    pub fn check_client_finished_after<M: AsRef<[u8]>>(
        &self,
        preceding: &[M],
        finished: &[u8],
    ) -> Result<(), TlsError> {
        let (ty, len) = read_handshake_header(finished)?;
        if ty != HandshakeType::Finished as u8 || finished.len() != len + 4 {
            return Err(TlsError::UnexpectedMessage(ty));
        }
        let mut transcript = self.transcript.clone();
        for msg in preceding {
            transcript.update(msg.as_ref());
        }
        let expected = self
            .key_schedule
            .finished_verify_data(&self.handshake.client, &transcript.current_hash())?;
        if parse_finished(&finished[4..])? != &expected {
            return Err(TlsError::BadFinished);
        }
        Ok(())
    }
}

fn encode_raw_extension(ext_type: u16, payload: &[u8], out: &mut Vec<u8>) -> Result<(), TlsError> {
    let record = ExtensionRecord::new(ext_type, payload.to_vec()).map_err(|_| TlsError::Decode)?;
    record.encode_into(out);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    WaitClientHello,
    WaitClientFinished,
    Established,
}

/// Server side of a TLS 1.3 connection, sans I/O.
pub struct ServerConnection {
    config: TestServerConfig,
    state: ServerState,
    flight: Option<ServerFlight>,
    recv_buf: Vec<u8>,
    pending: Vec<u8>,
    client_messages: Vec<Vec<u8>>,
    out: Vec<u8>,
    send_keys: Option<RecordProtection>,
    recv_keys: Option<RecordProtection>,
    application: Option<TrafficSecrets>,
    received: Vec<u8>,
    peer_closed: bool,
    client_hello: Option<ClientHelloExtensions>,
}

impl ServerConnection {
    pub fn new(config: TestServerConfig) -> Self {
        Self {
            config,
            state: ServerState::WaitClientHello,
            flight: None,
            recv_buf: Vec::new(),
            pending: Vec::new(),
            client_messages: Vec::new(),
            out: Vec::new(),
            send_keys: None,
            recv_keys: None,
            application: None,
            received: Vec::new(),
            peer_closed: false,
            client_hello: None,
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == ServerState::Established
    }

    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Application data received so far.
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    /// The ClientHello extensions, once one arrived.
    pub fn client_hello(&self) -> Option<&ClientHelloExtensions> {
        self.client_hello.as_ref()
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.recv_buf.extend_from_slice(data);
        while self.recv_buf.len() >= RECORD_HEADER_LEN && !self.peer_closed {
            let hdr = record::decode_record_header(&self.recv_buf)?;
            let total = RECORD_HEADER_LEN + hdr.length as usize;
            if self.recv_buf.len() < total {
                break;
            }
            let mut rec: Vec<u8> = self.recv_buf.drain(..total).collect();
            let (header, body) = rec.split_at_mut(RECORD_HEADER_LEN);
            let header = [header[0], header[1], header[2], header[3], header[4]];
            match hdr.content_type {
                ContentType::ChangeCipherSpec => {}
                ContentType::Handshake if self.recv_keys.is_none() => self.on_handshake(body)?,
                ContentType::Alert if self.recv_keys.is_none() => self.on_alert(body)?,
                ContentType::ApplicationData => {
                    let keys = self.recv_keys.as_mut().ok_or(TlsError::UnexpectedRecord(23))?;
                    let (inner, len) = keys.open(&header, body)?;
                    let data = &body[..len];
                    match inner {
                        ContentType::Handshake => self.on_handshake(data)?,
                        ContentType::Alert => self.on_alert(data)?,
                        ContentType::ApplicationData if self.is_established() => {
                            self.received.extend_from_slice(data)
                        }
                        other => return Err(TlsError::UnexpectedRecord(other as u8)),
                    }
                }
                other => return Err(TlsError::UnexpectedRecord(other as u8)),
            }
        }
        Ok(())
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), TlsError> {
        if !self.is_established() {
            return Err(TlsError::Closed);
        }
        self.seal(ContentType::ApplicationData, data)
    }

    pub fn close_notify(&mut self) -> Result<(), TlsError> {
        self.seal(ContentType::Alert, &[LEVEL_WARNING, AlertDescription::CloseNotify as u8])
    }

    /// Send KeyUpdate and switch to the next write key.
    pub fn send_key_update(&mut self, request_update: bool) -> Result<(), TlsError> {
        let mut msg = Vec::new();
        encode_handshake(HandshakeType::KeyUpdate, &[request_update as u8], &mut msg);
        self.seal(ContentType::Handshake, &msg)?;
        let app = self.application.as_mut().ok_or(TlsError::Closed)?;
        app.server = next_traffic_secret(&app.server)?;
        self.send_keys = Some(RecordProtection::new(self.config.suite, &app.server)?);
        Ok(())
    }

    pub fn send_new_session_ticket(&mut self) -> Result<(), TlsError> {
        // lifetime, age_add, nonce, ticket, no extensions
        let body = [0, 0, 0x0e, 0x10, 1, 2, 3, 4, 1, 0, 0, 4, 9, 9, 9, 9, 0, 0];
        let mut msg = Vec::new();
        encode_handshake(HandshakeType::NewSessionTicket, &body, &mut msg);
        self.seal(ContentType::Handshake, &msg)
    }

    fn seal(&mut self, ct: ContentType, data: &[u8]) -> Result<(), TlsError> {
        let keys = self.send_keys.as_mut().ok_or(TlsError::Closed)?;
        for chunk in data.chunks(MAX_FRAGMENT) {
            keys.seal(ct, chunk, &mut self.out)?;
        }
        Ok(())
    }

    fn on_alert(&mut self, body: &[u8]) -> Result<(), TlsError> {
        match body {
            [_, 0] => {
                self.peer_closed = true;
                Ok(())
            }
            [_, desc] => Err(TlsError::PeerAlert(*desc)),
            _ => Err(TlsError::Decode),
        }
    }

    fn on_handshake(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.pending.extend_from_slice(data);
        while self.pending.len() >= 4 {
            let (ty, len) = read_handshake_header(&self.pending)?;
            if self.pending.len() < 4 + len {
                break;
            }
            let msg: Vec<u8> = self.pending.drain(..4 + len).collect();
            match (self.state, HandshakeType::from_u8(ty)) {
                (ServerState::WaitClientHello, Some(HandshakeType::ClientHello)) => {
                    self.on_client_hello(&msg)?
                }
                (ServerState::WaitClientFinished, Some(HandshakeType::Certificate)) => {
                    self.client_messages.push(msg)
                }
                (ServerState::WaitClientFinished, Some(HandshakeType::Finished)) => {
                    let flight = self.flight.as_ref().ok_or(TlsError::Closed)?;
                    flight.check_client_finished_after(&self.client_messages, &msg)?;
                    let app = flight.application.clone();
                    self.recv_keys = Some(RecordProtection::new(self.config.suite, &app.client)?);
                    self.application = Some(app);
                    self.state = ServerState::Established;
                }
                (ServerState::Established, Some(HandshakeType::KeyUpdate)) => {
                    let app = self.application.as_mut().ok_or(TlsError::Closed)?;
                    app.client = next_traffic_secret(&app.client)?;
                    self.recv_keys = Some(RecordProtection::new(self.config.suite, &app.client)?);
                }
                _ => return Err(TlsError::UnexpectedMessage(ty)),
            }
        }
        Ok(())
    }

    fn on_client_hello(&mut self, msg: &[u8]) -> Result<(), TlsError> {
        let ch = parse_client_hello(&msg[4..])?;
        self.client_hello = Some(parse_client_hello_extensions(ch.extensions)?);

        let flight = ServerFlight::respond(&self.config, msg)?;
        let suite = self.config.suite;
        record::encode_plaintext_record(ContentType::Handshake, &flight.server_hello, &mut self.out);
        self.out.extend_from_slice(&CHANGE_CIPHER_SPEC);
        self.send_keys = Some(RecordProtection::new(suite, &flight.handshake.server)?);
        self.seal(ContentType::Handshake, &flight.encrypted)?;
        self.send_keys = Some(RecordProtection::new(suite, &flight.application.server)?);
        self.recv_keys = Some(RecordProtection::new(suite, &flight.handshake.client)?);
        self.application = Some(flight.application.clone());
        self.flight = Some(flight);
        self.state = ServerState::WaitClientFinished;
        Ok(())
    }
}

/// What a [`LoopbackServer`] does once the handshake is done.
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    /// Wait for a complete request head before answering.
    pub wait_for_request: bool,
    pub response: Vec<u8>,
    pub key_update: bool,
    pub session_ticket: bool,
}

impl ServerScript {
    pub fn respond(response: &[u8]) -> Self {
        Self {
            wait_for_request: true,
            response: response.to_vec(),
            ..Self::default()
        }
    }

    /// Close the connection as soon as the handshake completes.
    pub fn close_immediately() -> Self {
        Self::default()
    }
}

/// What the server saw.
#[derive(Debug, Default)]
pub struct ServerReport {
    pub client_hello: Option<ClientHelloExtensions>,
    /// Application bytes the client sent.
    pub received: Vec<u8>,
    pub handshake_completed: bool,
    pub client_closed: bool,
    pub error: Option<TlsError>,
}

/// One-shot server on `127.0.0.1`.
pub struct LoopbackServer {
    port: u16,
    handle: JoinHandle<ServerReport>,
}

impl LoopbackServer {
    pub fn spawn(config: TestServerConfig, script: ServerScript) -> Self {
        Self::start(move |stream| serve_tls(stream, config, script))
    }

    /// Plaintext server: answers the request with `script.response`.
    pub fn spawn_plain(script: ServerScript) -> Self {
        Self::start(move |stream| serve_plain(stream, script))
    }

    fn start<F>(serve: F) -> Self
    where
        F: FnOnce(TcpStream) -> ServerReport + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            serve(stream)
        });
        Self { port, handle }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", Port::Number(self.port))
    }

    pub fn join(self) -> ServerReport {
        self.handle.join().unwrap()
    }
}

/// An endpoint nothing listens on.
pub fn refused_endpoint() -> Endpoint {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    Endpoint::new("127.0.0.1", Port::Number(port))
}

fn has_request_head(data: &[u8]) -> bool {
    data.windows(4).any(|w| w == b"\r\n\r\n")
}

fn serve_tls(mut stream: TcpStream, config: TestServerConfig, script: ServerScript) -> ServerReport {
    let mut conn = ServerConnection::new(config);
    let mut report = ServerReport::default();
    let mut buf = [0u8; 4096];
    let mut responded = false;
    loop {
        let out = conn.take_output();
        if !out.is_empty() && stream.write_all(&out).is_err() {
            break;
        }
        if conn.is_established() && !responded {
            if conn.peer_closed() {
                break;
            }
            if !script.wait_for_request || has_request_head(conn.received()) {
                responded = true;
                let result = (|| {
                    if script.session_ticket {
                        conn.send_new_session_ticket()?;
                    }
                    if script.key_update {
                        conn.send_key_update(true)?;
                    }
                    if !script.response.is_empty() {
                        conn.send(&script.response)?;
                    }
                    conn.close_notify()
                })();
                if let Err(e) = result {
                    report.error = Some(e);
                    break;
                }
                if stream.write_all(&conn.take_output()).is_err() {
                    break;
                }
                let _ = stream.shutdown(Shutdown::Write);
                continue;
            }
        }
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if let Err(e) = conn.feed(&buf[..n]) {
            report.error = Some(e);
            break;
        }
    }
    report.handshake_completed = conn.is_established();
    report.client_closed = conn.peer_closed();
    report.received = conn.received().to_vec();
    report.client_hello = conn.client_hello.take();
    report
}

fn serve_plain(mut stream: TcpStream, script: ServerScript) -> ServerReport {
    let mut report = ServerReport::default();
    let mut buf = [0u8; 4096];
    while script.wait_for_request && !has_request_head(&report.received) {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => report.received.extend_from_slice(&buf[..n]),
        }
    }
    if stream.write_all(&script.response).is_ok() {
        let _ = stream.shutdown(Shutdown::Write);
    }
    // Drain until the client hangs up.
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => report.received.extend_from_slice(&buf[..n]),
        }
    }
    report.client_closed = true;
    report
}
