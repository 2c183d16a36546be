//! Blocking driver that moves bytes between a [`TlsConnection`] and a
//! [`Transport`].

use std::io::{self, Read, Write};

use tracing::trace;

use crate::error::HandshakeFailure;
use crate::transport::Transport;

use super::connection::TlsConnection;
use super::record::{MAX_RECORD_PAYLOAD, RECORD_HEADER_LEN};

const IO_BUF_LEN: usize = RECORD_HEADER_LEN + MAX_RECORD_PAYLOAD;

pub struct TlsStream<'a, T: Transport> {
    conn: TlsConnection<'a>,
    transport: T,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    eof: bool,
}

impl<'a, T: Transport> TlsStream<'a, T> {
    pub fn new(conn: TlsConnection<'a>, transport: T) -> Self {
        Self {
            conn,
            transport,
            read_buf: vec![0; IO_BUF_LEN],
            write_buf: vec![0; IO_BUF_LEN],
            eof: false,
        }
    }

    /// Exchange flights until the connection is active.
    ///
    /// On a protocol failure the alert queued by the connection is sent
    /// on a best-effort basis before returning.
    pub fn handshake(&mut self) -> Result<(), HandshakeFailure> {
        loop {
            self.flush_output()?;
            if self.conn.is_active() {
                return Ok(());
            }
            let n = self.transport.read(&mut self.read_buf)?;
            if n == 0 {
                return Err(HandshakeFailure::Eof);
            }
            trace!(bytes = n, "handshake bytes from transport");
            if let Err(e) = self.conn.feed_data(&self.read_buf[..n]) {
                let _ = self.flush_output();
                return Err(HandshakeFailure::Protocol(e));
            }
        }
    }

    pub fn connection(&self) -> &TlsConnection<'a> {
        &self.conn
    }

    /// Send close_notify (once) and shut the transport down.
    pub fn shutdown(&mut self) -> io::Result<()> {
        self.conn.close();
        let flushed = self.flush_output();
        let shut = self.transport.shutdown();
        flushed.and(shut)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        let mut wrote = false;
        while let Some(chunk) = self.conn.poll_output(&mut self.write_buf) {
            self.transport.write_all(chunk)?;
            wrote = true;
        }
        if wrote {
            self.transport.flush()?;
        }
        Ok(())
    }
}

impl<T: Transport> Read for TlsStream<'_, T> {
    /// Returns 0 once the peer sent close_notify or the transport hit EOF.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            while let Some(event) = self.conn.poll_event() {
                trace!(?event, "tls event");
            }
            if self.conn.has_app_data() {
                return Ok(self.conn.recv_app_data(buf));
            }
            if self.eof || self.conn.is_peer_closed() {
                return Ok(0);
            }
            let n = self.transport.read(&mut self.read_buf)?;
            if n == 0 {
                trace!("transport EOF without close_notify");
                self.eof = true;
                continue;
            }
            self.conn.feed_data(&self.read_buf[..n])?;
            // KeyUpdate answers.
            self.flush_output()?;
        }
    }
}

impl<T: Transport> Write for TlsStream<'_, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.send_app_data(buf)?;
        self.flush_output()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_output()
    }
}
