//! Single request/response exchange over a fresh session.

use std::io::{self, Write};
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::ext::ExtensionRegistry;
use crate::session::SessionContext;
use crate::transport::Connector;
use crate::trust::VerificationResult;

/// Default read chunk size.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// What to do when the peer chain does not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// Close without sending the request.
    Abort,
    /// Log the failure and carry on.
    #[default]
    WarnAndContinue,
}

impl FromStr for VerifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "warn" | "warn-and-continue" => Ok(Self::WarnAndContinue),
            other => Err(format!("unknown verify policy {other:?} (expected abort or warn)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangePolicy {
    pub on_verify_failure: VerifyPolicy,
    /// Capacity of the read buffer; each read forwards at most this much.
    pub read_buffer: usize,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self {
            on_verify_failure: VerifyPolicy::default(),
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

/// How an exchange that reached the read loop ended.
#[derive(Debug, Default)]
pub struct ExchangeReport {
    /// `None` for plaintext sessions.
    pub verification: Option<VerificationResult>,
    pub bytes_sent: usize,
    /// Bytes forwarded to the sink.
    pub bytes_received: usize,
    /// The read error that ended the loop early, if any. Everything
    /// forwarded before it is intact.
    pub read_error: Option<io::Error>,
}

impl ExchangeReport {
    /// The response ended with EOF rather than an error.
    pub fn completed(&self) -> bool {
        self.read_error.is_none()
    }
}

/// The request the CLI sends: a minimal HTTP/1.1 GET.
pub fn http_get(host: &str, path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: Close\r\n\r\n").into_bytes()
}

/// Build a TCP context from `config` and `registry`, then [`run`].
///
/// A trust store that fails to load aborts before any connection attempt.
pub fn fetch<W: Write + ?Sized>(
    config: SessionConfig,
    registry: ExtensionRegistry,
    endpoint: &Endpoint,
    request: &[u8],
    sink: &mut W,
    policy: &ExchangePolicy,
) -> Result<ExchangeReport> {
    let ctx = SessionContext::new(config, registry)?;
    run(&ctx, endpoint, request, sink, policy)
}

/// Connect, apply the verification policy, write `request` once and stream
/// the response into `sink` until EOF.
///
/// Nothing reaches `sink` unless the session was established. The session
/// is closed on every path; `sink` is flushed but never closed.
pub fn run<C: Connector, W: Write + ?Sized>(
    ctx: &SessionContext<C>,
    endpoint: &Endpoint,
    request: &[u8],
    sink: &mut W,
    policy: &ExchangePolicy,
) -> Result<ExchangeReport> {
    let mut session = ctx.connect(endpoint)?;
    let mut report = ExchangeReport {
        verification: session.verification_result().copied(),
        ..ExchangeReport::default()
    };

    if let Some(VerificationResult::Failed(err)) = report.verification {
        match policy.on_verify_failure {
            VerifyPolicy::Abort => {
                session.close();
                return Err(Error::VerificationFailed(err));
            }
            VerifyPolicy::WarnAndContinue => warn!(
                %endpoint,
                code = err.code(),
                reason = err.reason(),
                "certificate verification failed, continuing"
            ),
        }
    }

    let written = session.write(request)?;
    if written != request.len() {
        session.close();
        return Err(Error::Write(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {written} of {} bytes", request.len()),
        )));
    }
    report.bytes_sent = written;
    debug!(bytes = written, "request sent");

    let mut buf = vec![0u8; policy.read_buffer.max(1)];
    loop {
        match session.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                sink.write_all(&buf[..n]).map_err(Error::Output)?;
                report.bytes_received += n;
            }
            Err(Error::Read(e)) => {
                warn!(error = %e, forwarded = report.bytes_received, "read failed, ending exchange");
                report.read_error = Some(e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    sink.flush().map_err(Error::Output)?;
    session.close();

    info!(
        %endpoint,
        sent = report.bytes_sent,
        received = report.bytes_received,
        "exchange finished"
    );
    Ok(report)
}
