//! TLS 1.3 client connection over a byte stream, without I/O.
//!
//! Follows the `feed_data()` → `poll_output()` → `poll_event()` pattern:
//! the caller moves bytes between the socket and the connection, the
//! connection frames, protects and dispatches records.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::TlsError;
use crate::tls::alert::{AlertDescription, LEVEL_FATAL, LEVEL_WARNING};
use crate::tls::handshake::{ClientHandshake, ClientHelloConfig, HandshakeEntropy, HandshakeOutput};
use crate::tls::messages::CipherSuite;

use super::record::{
    self, ContentType, RecordProtection, CHANGE_CIPHER_SPEC, MAX_FRAGMENT, RECORD_HEADER_LEN,
};

/// Events produced by [`TlsConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsEvent {
    /// TLS handshake is complete; application data can now flow.
    HandshakeComplete,
    /// Application data is available (call `recv_app_data`).
    AppData,
    /// Peer sent a close_notify alert.
    PeerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Handshake,
    Active,
    /// close_notify sent; reads continue until the peer closes.
    Closing,
    /// Peer closed or a fatal error occurred.
    Closed,
}

pub struct TlsConnection<'a> {
    engine: ClientHandshake<'a>,
    state: ConnState,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    send_offset: usize,
    app_recv_buf: Vec<u8>,
    send_keys: Option<RecordProtection>,
    recv_keys: Option<RecordProtection>,
    ccs_sent: bool,
    close_sent: bool,
    peer_closed: bool,
    error: Option<TlsError>,
    events: VecDeque<TlsEvent>,
}

impl<'a> TlsConnection<'a> {
    /// Start a client handshake; the ClientHello is ready in
    /// [`poll_output`](Self::poll_output) immediately.
    pub fn new_client(config: &ClientHelloConfig<'a, '_>, entropy: HandshakeEntropy) -> Result<Self, TlsError> {
        let engine = ClientHandshake::new(config, entropy)?;
        let mut conn = Self {
            engine,
            state: ConnState::Handshake,
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
            send_offset: 0,
            app_recv_buf: Vec::new(),
            send_keys: None,
            recv_keys: None,
            ccs_sent: false,
            close_sent: false,
            peer_closed: false,
            error: None,
            events: VecDeque::new(),
        };
        conn.drain_engine()?;
        Ok(conn)
    }

    /// Feed raw bytes received from the transport.
    ///
    /// A fatal error queues an alert for the peer, closes the connection
    /// and is returned again by every later call.
    pub fn feed_data(&mut self, data: &[u8]) -> Result<(), TlsError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.peer_closed {
            return Ok(());
        }
        self.recv_buf.extend_from_slice(data);
        let result = self.process_recv();
        if let Err(e) = result {
            self.fail(e);
        }
        result
    }

    /// Pull the next chunk of outgoing transport data.
    pub fn poll_output<'b>(&mut self, buf: &'b mut [u8]) -> Option<&'b [u8]> {
        if self.send_offset >= self.send_buf.len() {
            return None;
        }
        let avail = self.send_buf.len() - self.send_offset;
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.send_buf[self.send_offset..self.send_offset + n]);
        self.send_offset += n;
        if self.send_offset >= self.send_buf.len() {
            self.send_buf.clear();
            self.send_offset = 0;
        }
        Some(&buf[..n])
    }

    pub fn has_output(&self) -> bool {
        self.send_offset < self.send_buf.len()
    }

    pub fn poll_event(&mut self) -> Option<TlsEvent> {
        self.events.pop_front()
    }

    /// Copy out decrypted application data; 0 when none is buffered.
    pub fn recv_app_data(&mut self, buf: &mut [u8]) -> usize {
        let n = self.app_recv_buf.len().min(buf.len());
        buf[..n].copy_from_slice(&self.app_recv_buf[..n]);
        self.app_recv_buf.drain(..n);
        n
    }

    pub fn has_app_data(&self) -> bool {
        !self.app_recv_buf.is_empty()
    }

    /// Encrypt application data into outgoing records.
    pub fn send_app_data(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.state != ConnState::Active {
            return Err(TlsError::Closed);
        }
        let keys = self.send_keys.as_mut().ok_or(TlsError::Closed)?;
        for chunk in data.chunks(MAX_FRAGMENT) {
            keys.seal(ContentType::ApplicationData, chunk, &mut self.send_buf)?;
        }
        Ok(data.len())
    }

    /// Queue close_notify. Idempotent; a connection that already failed
    /// sends nothing more.
    pub fn close(&mut self) {
        if self.close_sent || self.error.is_some() {
            return;
        }
        if let Err(e) = self.send_alert(LEVEL_WARNING, AlertDescription::CloseNotify) {
            debug!(error = %e, "could not queue close_notify");
        }
        self.close_sent = true;
        self.state = if self.peer_closed {
            ConnState::Closed
        } else {
            ConnState::Closing
        };
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.engine.alpn()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.engine.cipher_suite()
    }

    pub fn peer_chain(&self) -> &[Vec<u8>] {
        self.engine.peer_chain()
    }

    pub fn certificate_verified(&self) -> bool {
        self.engine.certificate_verified()
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnState::Active
    }

    /// Either side has ended the connection.
    pub fn is_closed(&self) -> bool {
        self.peer_closed || matches!(self.state, ConnState::Closed | ConnState::Closing)
    }

    /// The peer sent close_notify.
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    fn fail(&mut self, e: TlsError) {
        warn!(error = %e, "TLS connection failed");
        if let Some(desc) = AlertDescription::for_error(e) {
            let _ = self.send_alert(LEVEL_FATAL, desc);
        }
        self.error = Some(e);
        self.state = ConnState::Closed;
    }

    fn process_recv(&mut self) -> Result<(), TlsError> {
        while !self.peer_closed {
            if self.recv_buf.len() < RECORD_HEADER_LEN {
                return Ok(());
            }
            let hdr = record::decode_record_header(&self.recv_buf)?;
            let total = RECORD_HEADER_LEN + hdr.length as usize;
            if self.recv_buf.len() < total {
                return Ok(());
            }
            let mut rec: Vec<u8> = self.recv_buf.drain(..total).collect();
            let (header, body) = rec.split_at_mut(RECORD_HEADER_LEN);
            let header: [u8; RECORD_HEADER_LEN] =
                [header[0], header[1], header[2], header[3], header[4]];

            match hdr.content_type {
                ContentType::ChangeCipherSpec => {
                    if self.state != ConnState::Handshake || body != [1u8] {
                        return Err(TlsError::UnexpectedRecord(ContentType::ChangeCipherSpec as u8));
                    }
                }
                ContentType::Alert if self.recv_keys.is_none() => self.handle_alert(body)?,
                ContentType::Handshake if self.recv_keys.is_none() => {
                    self.engine.read_handshake(body)?;
                    self.drain_engine()?;
                }
                ContentType::ApplicationData => {
                    let (inner, len) = self
                        .recv_keys
                        .as_mut()
                        .ok_or(TlsError::UnexpectedRecord(ContentType::ApplicationData as u8))?
                        .open(&header, body)?;
                    let data = &body[..len];
                    match inner {
                        ContentType::Handshake => {
                            self.engine.read_handshake(data)?;
                            self.drain_engine()?;
                        }
                        ContentType::ApplicationData if self.state != ConnState::Handshake => {
                            if !data.is_empty() {
                                self.app_recv_buf.extend_from_slice(data);
                                self.events.push_back(TlsEvent::AppData);
                            }
                        }
                        ContentType::Alert => self.handle_alert(data)?,
                        other => return Err(TlsError::UnexpectedRecord(other as u8)),
                    }
                }
                other => return Err(TlsError::UnexpectedRecord(other as u8)),
            }
        }
        Ok(())
    }

    fn handle_alert(&mut self, body: &[u8]) -> Result<(), TlsError> {
        let &[level, desc] = body else {
            return Err(TlsError::Decode);
        };
        match AlertDescription::from_u8(desc) {
            Some(AlertDescription::CloseNotify) => {
                debug!("peer sent close_notify");
                self.peer_closed = true;
                if self.close_sent {
                    self.state = ConnState::Closed;
                }
                self.events.push_back(TlsEvent::PeerClosed);
                Ok(())
            }
            Some(AlertDescription::UserCanceled) if level == LEVEL_WARNING => Ok(()),
            _ => Err(TlsError::PeerAlert(desc)),
        }
    }

    /// Apply the engine's queued output in order.
    fn drain_engine(&mut self) -> Result<(), TlsError> {
        while let Some(output) = self.engine.poll_output() {
            match output {
                HandshakeOutput::Message(msg) => self.send_handshake(&msg)?,
                HandshakeOutput::HandshakeKeys(secrets) => {
                    let suite = self.engine.cipher_suite().ok_or(TlsError::Closed)?;
                    self.recv_keys = Some(RecordProtection::new(suite, &secrets.server)?);
                    self.send_keys = Some(RecordProtection::new(suite, &secrets.client)?);
                    if !self.ccs_sent {
                        self.send_buf.extend_from_slice(&CHANGE_CIPHER_SPEC);
                        self.ccs_sent = true;
                    }
                }
                HandshakeOutput::ApplicationKeys(secrets) => {
                    let suite = self.engine.cipher_suite().ok_or(TlsError::Closed)?;
                    self.recv_keys = Some(RecordProtection::new(suite, &secrets.server)?);
                    self.send_keys = Some(RecordProtection::new(suite, &secrets.client)?);
                    self.state = ConnState::Active;
                    self.events.push_back(TlsEvent::HandshakeComplete);
                }
                HandshakeOutput::UpdateRecvKey(secret) => {
                    let suite = self.engine.cipher_suite().ok_or(TlsError::Closed)?;
                    self.recv_keys = Some(RecordProtection::new(suite, &secret)?);
                }
                HandshakeOutput::UpdateSendKey(secret) => {
                    let suite = self.engine.cipher_suite().ok_or(TlsError::Closed)?;
                    self.send_keys = Some(RecordProtection::new(suite, &secret)?);
                }
            }
        }
        Ok(())
    }

    fn send_handshake(&mut self, msg: &[u8]) -> Result<(), TlsError> {
        for chunk in msg.chunks(MAX_FRAGMENT) {
            match self.send_keys.as_mut() {
                Some(keys) => keys.seal(ContentType::Handshake, chunk, &mut self.send_buf)?,
                None => record::encode_plaintext_record(ContentType::Handshake, chunk, &mut self.send_buf),
            }
        }
        Ok(())
    }

    fn send_alert(&mut self, level: u8, desc: AlertDescription) -> Result<(), TlsError> {
        let alert = [level, desc as u8];
        match self.send_keys.as_mut() {
            Some(keys) => keys.seal(ContentType::Alert, &alert, &mut self.send_buf),
            None => {
                record::encode_plaintext_record(ContentType::Alert, &alert, &mut self.send_buf);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::{ExtensionRegistry, Rejected};
    use crate::testing::{ServerConnection, TestServerConfig};

    fn entropy() -> HandshakeEntropy {
        HandshakeEntropy {
            x25519_secret: [0xAA; 32],
            random: [0xBB; 32],
            session_id: [0xCC; 32],
        }
    }

    fn make_client<'a>(registry: &'a ExtensionRegistry, alpn: &'a [Vec<u8>]) -> TlsConnection<'a> {
        let config = ClientHelloConfig {
            server_name: "test.local",
            alpn,
            registry,
        };
        TlsConnection::new_client(&config, entropy()).unwrap()
    }

    fn drain(conn: &mut TlsConnection<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        while let Some(chunk) = conn.poll_output(&mut buf) {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Shuttle bytes until neither side has anything to say.
    fn pump(client: &mut TlsConnection<'_>, server: &mut ServerConnection) -> Result<(), TlsError> {
        for _ in 0..20 {
            let c2s = drain(client);
            if !c2s.is_empty() {
                server.feed(&c2s)?;
            }
            let s2c = server.take_output();
            if !s2c.is_empty() {
                client.feed_data(&s2c)?;
            }
            if c2s.is_empty() && s2c.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn drain_events(c: &mut TlsConnection<'_>) -> Vec<TlsEvent> {
        std::iter::from_fn(|| c.poll_event()).collect()
    }

    #[test]
    fn handshake_completes() {
        let registry = ExtensionRegistry::new();
        let mut client = make_client(&registry, &[]);
        let mut server = ServerConnection::new(TestServerConfig::ed25519("test.local"));

        assert!(!client.is_active());
        pump(&mut client, &mut server).unwrap();

        assert_eq!(drain_events(&mut client), vec![TlsEvent::HandshakeComplete]);
        assert!(client.is_active());
        assert!(server.is_established());
        assert!(client.certificate_verified());
        assert_eq!(client.peer_chain().len(), 1);
    }

    #[test]
    fn app_data_roundtrip_both_suites() {
        for suite in CipherSuite::ALL {
            let registry = ExtensionRegistry::new();
            let mut client = make_client(&registry, &[]);
            let mut config = TestServerConfig::ed25519("test.local");
            config.suite = suite;
            let mut server = ServerConnection::new(config);
            pump(&mut client, &mut server).unwrap();
            assert_eq!(client.cipher_suite(), Some(suite));

            client.send_app_data(b"Hello from client").unwrap();
            pump(&mut client, &mut server).unwrap();
            assert_eq!(server.received(), b"Hello from client");

            server.send(b"Hello from server").unwrap();
            pump(&mut client, &mut server).unwrap();
            let events = drain_events(&mut client);
            assert!(events.contains(&TlsEvent::AppData));

            let mut buf = [0u8; 256];
            let n = client.recv_app_data(&mut buf);
            assert_eq!(&buf[..n], b"Hello from server");
            assert_eq!(client.recv_app_data(&mut buf), 0);
        }
    }

    #[test]
    fn large_write_is_fragmented() {
        let registry = ExtensionRegistry::new();
        let mut client = make_client(&registry, &[]);
        let mut server = ServerConnection::new(TestServerConfig::ed25519("test.local"));
        pump(&mut client, &mut server).unwrap();

        let big = vec![0x61; 40_000];
        client.send_app_data(&big).unwrap();
        pump(&mut client, &mut server).unwrap();
        assert_eq!(server.received(), &big[..]);
    }

    #[test]
    fn alpn_negotiation() {
        let registry = ExtensionRegistry::new();
        let alpn = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        let mut client = make_client(&registry, &alpn);
        let mut server = ServerConnection::new(TestServerConfig::ed25519("test.local"));
        pump(&mut client, &mut server).unwrap();
        assert_eq!(client.alpn(), Some(&b"http/1.1"[..]));
    }

    #[test]
    fn key_update_and_ticket_after_handshake() {
        let registry = ExtensionRegistry::new();
        let mut client = make_client(&registry, &[]);
        let mut server = ServerConnection::new(TestServerConfig::ed25519("test.local"));
        pump(&mut client, &mut server).unwrap();

        server.send_new_session_ticket().unwrap();
        server.send_key_update(true).unwrap();
        server.send(b"after update").unwrap();
        pump(&mut client, &mut server).unwrap();

        let mut buf = [0u8; 64];
        let n = client.recv_app_data(&mut buf);
        assert_eq!(&buf[..n], b"after update");

        // Our answer to the update request switched the client write key too.
        client.send_app_data(b"ack").unwrap();
        pump(&mut client, &mut server).unwrap();
        assert_eq!(server.received(), b"ack");
    }

    #[test]
    fn send_before_handshake_fails() {
        let registry = ExtensionRegistry::new();
        let mut client = make_client(&registry, &[]);
        assert_eq!(client.send_app_data(b"early"), Err(TlsError::Closed));
    }

    #[test]
    fn graceful_close_both_ways() {
        let registry = ExtensionRegistry::new();
        let mut client = make_client(&registry, &[]);
        let mut server = ServerConnection::new(TestServerConfig::ed25519("test.local"));
        pump(&mut client, &mut server).unwrap();
        drain_events(&mut client);

        server.send(b"bye").unwrap();
        server.close_notify().unwrap();
        pump(&mut client, &mut server).unwrap();
        assert_eq!(
            drain_events(&mut client),
            vec![TlsEvent::AppData, TlsEvent::PeerClosed]
        );
        assert!(client.is_peer_closed());

        client.close();
        client.close();
        pump(&mut client, &mut server).unwrap();
        assert!(server.peer_closed());
    }

    #[test]
    fn hook_rejection_sends_alert() {
        let mut registry = ExtensionRegistry::new();
        registry
            .register(18, None, Some(Box::new(|_, _| Err(Rejected))))
            .unwrap();
        let mut client = make_client(&registry, &[]);
        let mut config = TestServerConfig::ed25519("test.local");
        config.encrypted_extensions.push((18, vec![0, 1, 2]));
        let mut server = ServerConnection::new(config);

        let err = pump(&mut client, &mut server).unwrap_err();
        assert_eq!(err, TlsError::ExtensionRejected(18));
        assert!(client.is_closed());
        // The alert goes out under handshake keys.
        let alert = drain(&mut client);
        assert_eq!(
            server.feed(&alert),
            Err(TlsError::PeerAlert(AlertDescription::UnsupportedExtension as u8))
        );
        assert_eq!(client.feed_data(b"more"), Err(TlsError::ExtensionRejected(18)));
    }

    #[test]
    fn fatal_alert_from_server() {
        let registry = ExtensionRegistry::new();
        let mut client = make_client(&registry, &[]);
        drain(&mut client);
        let err = client.feed_data(&[21, 3, 3, 0, 2, 2, 40]).unwrap_err();
        assert_eq!(err, TlsError::PeerAlert(40));
    }

    #[test]
    fn garbage_record_type() {
        let registry = ExtensionRegistry::new();
        let mut client = make_client(&registry, &[]);
        drain(&mut client);
        assert_eq!(
            client.feed_data(b"HTTP/1.1 400 Bad Request\r\n"),
            Err(TlsError::UnexpectedRecord(b'H'))
        );
        // unexpected_message, in plaintext
        assert_eq!(drain(&mut client), vec![21, 3, 3, 0, 2, 2, 10]);
    }
}
