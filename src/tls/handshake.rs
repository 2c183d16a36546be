//! TLS 1.3 client handshake state machine.
//!
//! ```text
//! WaitServerHello -> WaitEncryptedExtensions -> WaitCertificate ->
//! WaitCertificateVerify -> WaitFinished -> Complete
//! ```
//!
//! The engine never touches records or sockets. It consumes handshake
//! bytes and queues [`HandshakeOutput`] items in the order the record layer
//! must apply them, so a key change always lands between the right
//! messages.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::crypto::key_schedule::hkdf_expand_label;
use crate::crypto::rustcrypto::HkdfSha256;
use crate::crypto::signature::{self, PublicKey, SignatureError};
use crate::error::TlsError;
use crate::ext::ExtensionRegistry;
use crate::tls::extensions::{
    dispatch_certificate_extensions, encode_client_hello_extensions,
    parse_encrypted_extensions_data, parse_server_hello_extensions, ClientHelloParams, TLS13,
};
use crate::tls::key_schedule_tls::{TlsKeySchedule, TrafficSecrets};
use crate::tls::messages::{
    self, encode_client_hello, encode_finished, encode_handshake, parse_certificate,
    parse_certificate_verify, parse_encrypted_extensions, parse_finished, parse_server_hello,
    read_handshake_header, CipherSuite, HandshakeType, HELLO_RETRY_REQUEST_RANDOM,
};
use crate::tls::transcript::TranscriptHash;
use crate::x509::Certificate;

/// Largest handshake message accepted (certificate chains included).
const MAX_HANDSHAKE_MESSAGE: usize = 1 << 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    WaitServerHello,
    WaitEncryptedExtensions,
    /// Certificate, or a CertificateRequest first.
    WaitCertificate,
    WaitCertificateVerify,
    WaitFinished,
    Complete,
    Failed,
}

/// Work for the record layer, applied strictly in queue order.
#[derive(Clone)]
pub enum HandshakeOutput {
    /// A complete handshake message to send under the current write keys.
    Message(Vec<u8>),
    /// Switch both directions to handshake traffic keys.
    HandshakeKeys(TrafficSecrets),
    /// Switch both directions to application traffic keys.
    ApplicationKeys(TrafficSecrets),
    /// The peer rolled its write key (KeyUpdate).
    UpdateRecvKey([u8; 32]),
    /// Our write key rolls after the queued KeyUpdate is sent.
    UpdateSendKey([u8; 32]),
}

/// What the client offers. Only `alpn` and `registry` are borrowed for
/// the life of the handshake.
pub struct ClientHelloConfig<'a, 'n> {
    /// Sent as SNI unless it is an IP literal.
    pub server_name: &'n str,
    pub alpn: &'a [Vec<u8>],
    pub registry: &'a ExtensionRegistry,
}

/// Per-handshake randomness, drawn by the caller.
pub struct HandshakeEntropy {
    pub x25519_secret: [u8; 32],
    pub random: [u8; 32],
    pub session_id: [u8; 32],
}

impl HandshakeEntropy {
    pub fn generate() -> Self {
        Self {
            x25519_secret: rand::random(),
            random: rand::random(),
            session_id: rand::random(),
        }
    }
}

pub struct ClientHandshake<'a> {
    state: HandshakeState,
    registry: &'a ExtensionRegistry,
    offered_alpn: &'a [Vec<u8>],
    secret: x25519_dalek::StaticSecret,
    session_id: [u8; 32],
    transcript: TranscriptHash,
    key_schedule: Option<TlsKeySchedule<HkdfSha256>>,
    handshake_secrets: Option<TrafficSecrets>,
    application_secrets: Option<TrafficSecrets>,
    suite: Option<CipherSuite>,
    alpn: Option<Vec<u8>>,
    /// Context of a CertificateRequest we must answer with an empty chain.
    certificate_request: Option<Vec<u8>>,
    peer_chain: Vec<Vec<u8>>,
    leaf_key: Option<PublicKey>,
    certificate_verified: bool,
    pending: Vec<u8>,
    output: VecDeque<HandshakeOutput>,
}

impl<'a> ClientHandshake<'a> {
    /// Build the ClientHello (running every emit hook) and queue it.
    pub fn new(config: &ClientHelloConfig<'a, '_>, entropy: HandshakeEntropy) -> Result<Self, TlsError> {
        let secret = x25519_dalek::StaticSecret::from(entropy.x25519_secret);
        let public = x25519_dalek::PublicKey::from(&secret);

        let server_name = match config.server_name.parse::<std::net::IpAddr>() {
            Ok(_) => None,
            Err(_) if config.server_name.is_empty() => None,
            Err(_) => Some(config.server_name),
        };
        let params = ClientHelloParams {
            server_name,
            x25519_public: public.as_bytes(),
            alpn: config.alpn,
        };
        let mut extensions = Vec::with_capacity(256);
        encode_client_hello_extensions(&params, config.registry, &mut extensions)?;

        let mut client_hello = Vec::with_capacity(extensions.len() + 128);
        encode_client_hello(
            &entropy.random,
            &entropy.session_id,
            &CipherSuite::ALL,
            &extensions,
            &mut client_hello,
        )?;
        debug!(
            len = client_hello.len(),
            sni = ?server_name,
            hooks = config.registry.len(),
            "built ClientHello"
        );

        let mut transcript = TranscriptHash::new();
        transcript.update(&client_hello);
        let mut output = VecDeque::new();
        output.push_back(HandshakeOutput::Message(client_hello));

        Ok(Self {
            state: HandshakeState::WaitServerHello,
            registry: config.registry,
            offered_alpn: config.alpn,
            secret,
            session_id: entropy.session_id,
            transcript,
            key_schedule: None,
            handshake_secrets: None,
            application_secrets: None,
            suite: None,
            alpn: None,
            certificate_request: None,
            peer_chain: Vec::new(),
            leaf_key: None,
            certificate_verified: false,
            pending: Vec::new(),
            output,
        })
    }

    /// Feed decrypted handshake bytes. Messages may be split or coalesced
    /// arbitrarily; complete ones are processed immediately.
    pub fn read_handshake(&mut self, data: &[u8]) -> Result<(), TlsError> {
        if self.state == HandshakeState::Failed {
            return Err(TlsError::Closed);
        }
        self.pending.extend_from_slice(data);
        let result = self.process_pending();
        if result.is_err() {
            self.state = HandshakeState::Failed;
        }
        result
    }

    pub fn poll_output(&mut self) -> Option<HandshakeOutput> {
        self.output.pop_front()
    }

    pub fn is_complete(&self) -> bool {
        self.state == HandshakeState::Complete
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }

    /// Certificates as presented by the server, leaf first.
    pub fn peer_chain(&self) -> &[Vec<u8>] {
        &self.peer_chain
    }

    /// Whether CertificateVerify was checked against the leaf key. False
    /// when the leaf key type is one we cannot verify.
    pub fn certificate_verified(&self) -> bool {
        self.certificate_verified
    }

    fn process_pending(&mut self) -> Result<(), TlsError> {
        loop {
            if self.pending.len() < 4 {
                return Ok(());
            }
            let (_, body_len) = read_handshake_header(&self.pending)?;
            if body_len > MAX_HANDSHAKE_MESSAGE {
                return Err(TlsError::BufferTooSmall { needed: body_len });
            }
            if self.pending.len() < 4 + body_len {
                return Ok(());
            }
            let message: Vec<u8> = self.pending.drain(..4 + body_len).collect();
            let key_change = matches!(
                self.state,
                HandshakeState::WaitServerHello | HandshakeState::WaitFinished
            );
            self.process_message(&message)?;
            // Messages after a key change must arrive under the new keys.
            if key_change && !self.pending.is_empty() {
                return Err(TlsError::UnexpectedMessage(self.pending[0]));
            }
        }
    }

    fn process_message(&mut self, message: &[u8]) -> Result<(), TlsError> {
        let type_byte = message[0];
        let body = &message[4..];
        let msg_type = HandshakeType::from_u8(type_byte).ok_or(TlsError::UnexpectedMessage(type_byte))?;
        trace!(?msg_type, len = body.len(), state = ?self.state, "handshake message");

        match (self.state, msg_type) {
            (HandshakeState::WaitServerHello, HandshakeType::ServerHello) => {
                self.process_server_hello(message, body)
            }
            (HandshakeState::WaitEncryptedExtensions, HandshakeType::EncryptedExtensions) => {
                self.transcript.update(message);
                self.process_encrypted_extensions(body)
            }
            (HandshakeState::WaitCertificate, HandshakeType::CertificateRequest)
                if self.certificate_request.is_none() =>
            {
                self.transcript.update(message);
                let ctx_len = *body.first().ok_or(TlsError::Decode)? as usize;
                let context = messages::take(body, 1, ctx_len)?;
                debug!("server requested a client certificate; sending none");
                self.certificate_request = Some(context.to_vec());
                Ok(())
            }
            (HandshakeState::WaitCertificate, HandshakeType::Certificate) => {
                self.transcript.update(message);
                self.process_certificate(body)
            }
            (HandshakeState::WaitCertificateVerify, HandshakeType::CertificateVerify) => {
                let hash = self.transcript.current_hash();
                self.transcript.update(message);
                self.process_certificate_verify(body, &hash)
            }
            (HandshakeState::WaitFinished, HandshakeType::Finished) => {
                let hash = self.transcript.current_hash();
                self.transcript.update(message);
                self.process_server_finished(body, &hash)
            }
            (HandshakeState::Complete, HandshakeType::NewSessionTicket) => {
                debug!("ignoring NewSessionTicket");
                Ok(())
            }
            (HandshakeState::Complete, HandshakeType::KeyUpdate) => self.process_key_update(body),
            _ => Err(TlsError::UnexpectedMessage(type_byte)),
        }
    }

    fn process_server_hello(&mut self, message: &[u8], body: &[u8]) -> Result<(), TlsError> {
        let sh = parse_server_hello(body)?;
        if sh.random == &HELLO_RETRY_REQUEST_RANDOM {
            return Err(TlsError::Unsupported("HelloRetryRequest"));
        }
        if sh.session_id != self.session_id {
            return Err(TlsError::Decode);
        }
        let suite =
            CipherSuite::from_u16(sh.cipher_suite).ok_or(TlsError::Unsupported("cipher suite"))?;
        let ext = parse_server_hello_extensions(sh.extensions, self.registry)?;
        if ext.selected_version != TLS13 {
            return Err(TlsError::Unsupported("protocol version"));
        }
        let server_public = ext.key_share.ok_or(TlsError::Decode)?;

        let shared = self
            .secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(server_public));
        if !shared.was_contributory() {
            return Err(TlsError::Crypto);
        }

        self.transcript.update(message);
        let key_schedule = TlsKeySchedule::new(HkdfSha256, shared.as_bytes())?;
        let secrets = key_schedule.handshake_traffic_secrets(&self.transcript.current_hash())?;

        debug!(suite = suite.name(), "ServerHello accepted");
        self.suite = Some(suite);
        self.key_schedule = Some(key_schedule);
        self.handshake_secrets = Some(secrets.clone());
        self.output.push_back(HandshakeOutput::HandshakeKeys(secrets));
        self.state = HandshakeState::WaitEncryptedExtensions;
        Ok(())
    }

    fn process_encrypted_extensions(&mut self, body: &[u8]) -> Result<(), TlsError> {
        let data = parse_encrypted_extensions(body)?;
        let parsed = parse_encrypted_extensions_data(data, self.registry)?;
        if let Some(proto) = &parsed.alpn {
            if !self.offered_alpn.iter().any(|p| p == proto) {
                return Err(TlsError::Unsupported("ALPN protocol"));
            }
        }
        self.alpn = parsed.alpn;
        self.state = HandshakeState::WaitCertificate;
        Ok(())
    }

    fn process_certificate(&mut self, body: &[u8]) -> Result<(), TlsError> {
        let payload = parse_certificate(body)?;
        if !payload.context.is_empty() {
            return Err(TlsError::Decode);
        }
        let mut chain = Vec::new();
        for entry in messages::iter_certificate_entries(payload.entries) {
            let entry = entry?;
            if chain.is_empty() {
                dispatch_certificate_extensions(entry.extensions, self.registry)?;
            }
            chain.push(entry.cert_data.to_vec());
        }
        let leaf = chain.first().ok_or(TlsError::NoCertificate)?;
        let parsed = Certificate::parse(leaf).map_err(|_| TlsError::Decode)?;
        self.leaf_key = match parsed.public_key() {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(error = ?e, "leaf key cannot be used for CertificateVerify");
                None
            }
        };
        debug!(
            certificates = chain.len(),
            subject = ?parsed.subject_common_name(),
            "server Certificate received"
        );
        self.peer_chain = chain;
        self.state = HandshakeState::WaitCertificateVerify;
        Ok(())
    }

    fn process_certificate_verify(&mut self, body: &[u8], hash: &[u8; 32]) -> Result<(), TlsError> {
        let cv = parse_certificate_verify(body)?;
        let allowed = signature::OFFERED_SCHEMES.contains(&cv.algorithm)
            && !matches!(
                cv.algorithm,
                signature::RSA_PKCS1_SHA256 | signature::RSA_PKCS1_SHA384 | signature::RSA_PKCS1_SHA512
            );
        if !allowed {
            return Err(TlsError::Unsupported("signature scheme"));
        }
        if let Some(key) = &self.leaf_key {
            let content = signature::server_certificate_verify_message(hash);
            match key.verify(cv.algorithm, &content, cv.signature) {
                Ok(()) => self.certificate_verified = true,
                Err(SignatureError::Invalid | SignatureError::Unsupported) => {
                    return Err(TlsError::BadSignature)
                }
            }
        }
        self.state = HandshakeState::WaitFinished;
        Ok(())
    }

    fn process_server_finished(&mut self, body: &[u8], hash: &[u8; 32]) -> Result<(), TlsError> {
        let verify_data = parse_finished(body)?;
        let ks = self.key_schedule.as_ref().ok_or(TlsError::Closed)?;
        let hs = self.handshake_secrets.as_ref().ok_or(TlsError::Closed)?;

        let expected = ks.finished_verify_data(&hs.server, hash)?;
        if !ct_eq(&expected, verify_data) {
            return Err(TlsError::BadFinished);
        }

        let app = ks.application_traffic_secrets(&self.transcript.current_hash())?;
        let client_hs = hs.client;

        if let Some(context) = self.certificate_request.take() {
            let mut body = Vec::with_capacity(context.len() + 4);
            body.push(context.len() as u8);
            body.extend_from_slice(&context);
            body.extend_from_slice(&[0, 0, 0]);
            let mut msg = Vec::with_capacity(body.len() + 4);
            encode_handshake(HandshakeType::Certificate, &body, &mut msg);
            self.transcript.update(&msg);
            self.output.push_back(HandshakeOutput::Message(msg));
        }

        let client_verify = ks.finished_verify_data(&client_hs, &self.transcript.current_hash())?;
        let mut finished = Vec::with_capacity(36);
        encode_finished(&client_verify, &mut finished);
        self.transcript.update(&finished);
        self.output.push_back(HandshakeOutput::Message(finished));
        self.output
            .push_back(HandshakeOutput::ApplicationKeys(app.clone()));

        self.application_secrets = Some(app);
        self.handshake_secrets = None;
        self.state = HandshakeState::Complete;
        debug!(alpn = ?self.alpn.as_deref().map(String::from_utf8_lossy), "handshake complete");
        Ok(())
    }

    fn process_key_update(&mut self, body: &[u8]) -> Result<(), TlsError> {
        let request_update = match body {
            [0] => false,
            [1] => true,
            _ => return Err(TlsError::Decode),
        };
        let secrets = self.application_secrets.as_mut().ok_or(TlsError::Closed)?;
        secrets.server = next_traffic_secret(&secrets.server)?;
        self.output
            .push_back(HandshakeOutput::UpdateRecvKey(secrets.server));
        if request_update {
            let mut msg = Vec::with_capacity(5);
            encode_handshake(HandshakeType::KeyUpdate, &[0], &mut msg);
            self.output.push_back(HandshakeOutput::Message(msg));
            secrets.client = next_traffic_secret(&secrets.client)?;
            self.output
                .push_back(HandshakeOutput::UpdateSendKey(secrets.client));
        }
        debug!(request_update, "processed KeyUpdate");
        Ok(())
    }
}

/// `application_traffic_secret_N+1` (RFC 8446 §7.2).
pub(crate) fn next_traffic_secret(secret: &[u8; 32]) -> Result<[u8; 32], TlsError> {
    let mut next = [0u8; 32];
    hkdf_expand_label(&HkdfSha256, secret, b"traffic upd", &[], &mut next)?;
    Ok(next)
}

/// Constant-time comparison of two byte slices.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
