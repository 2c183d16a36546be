//! Serialized text sink for extension diagnostics.
//!
//! Hooks receive a [`DiagnosticSink`] handle explicitly. A process-wide
//! instance exists for callers that want one shared destination; it is
//! created at most once and later installs are refused.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

static GLOBAL: OnceLock<DiagnosticSink> = OnceLock::new();

#[derive(Clone)]
pub struct DiagnosticSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl DiagnosticSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Discards everything (quiet mode).
    pub fn null() -> Self {
        Self::new(io::sink())
    }

    /// The process-wide sink, created on first use (stdout unless
    /// [`DiagnosticSink::install_global`] ran first).
    pub fn global() -> Self {
        GLOBAL.get_or_init(Self::stdout).clone()
    }

    /// Install `sink` as the process-wide sink. Returns `false` if one is
    /// already in place; the existing sink is kept.
    pub fn install_global(sink: DiagnosticSink) -> bool {
        GLOBAL.set(sink).is_ok()
    }

    /// Write one complete block and flush, holding the lock for the whole
    /// block so concurrent writers never interleave.
    pub fn write_block(&self, block: &str) -> io::Result<()> {
        let mut w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        w.write_all(block.as_bytes())?;
        w.flush()
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticSink").finish_non_exhaustive()
    }
}
