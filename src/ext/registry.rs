//! Per-extension-type emit/parse callbacks.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::{Error, Result, TlsError};
use crate::ext::{DiagnosticSink, ExtensionRecord};
use crate::tls::extensions::ENGINE_EXTENSIONS;

/// Produces the ClientHello payload for a type; `None` omits it.
pub type EmitFn = Box<dyn Fn(u16) -> Option<Vec<u8>> + Send + Sync>;

/// Consumes a payload the server sent for a type.
pub type ParseFn = Box<dyn Fn(u16, &[u8]) -> Result<(), Rejected> + Send + Sync>;

/// Returned by a parse hook to abort the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

struct Hook {
    emit: Option<EmitFn>,
    parse: Option<ParseFn>,
}

/// Registered hooks, keyed by extension type. Immutable once handed to a
/// session context.
#[derive(Default)]
pub struct ExtensionRegistry {
    hooks: BTreeMap<u16, Hook>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register callbacks for `ext_type`.
    ///
    /// Without an emit callback the type is still announced in the
    /// ClientHello with an empty payload, which is how a client asks for
    /// server-provided data such as signed certificate timestamps.
    pub fn register(
        &mut self,
        ext_type: u16,
        emit: Option<EmitFn>,
        parse: Option<ParseFn>,
    ) -> Result<()> {
        if ENGINE_EXTENSIONS.contains(&ext_type) {
            return Err(Error::ReservedExtension(ext_type));
        }
        if self.hooks.contains_key(&ext_type) {
            return Err(Error::DuplicateExtension(ext_type));
        }
        debug!(
            ext_type,
            emit = emit.is_some(),
            parse = parse.is_some(),
            "registered extension hook"
        );
        self.hooks.insert(ext_type, Hook { emit, parse });
        Ok(())
    }

    /// Register the stock hook that armors each received `ext_type`
    /// extension into `sink`.
    pub fn register_serverinfo(&mut self, ext_type: u16, sink: DiagnosticSink) -> Result<()> {
        self.register(ext_type, None, Some(serverinfo_hook(sink)))
    }

    pub fn contains(&self, ext_type: u16) -> bool {
        self.hooks.contains_key(&ext_type)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = u16> + '_ {
        self.hooks.keys().copied()
    }

    /// Run every emit hook, in type order, and collect what goes into the
    /// ClientHello.
    pub(crate) fn emit_client_hello(&self) -> std::result::Result<Vec<ExtensionRecord>, TlsError> {
        let mut out = Vec::with_capacity(self.hooks.len());
        for (&ext_type, hook) in &self.hooks {
            let payload = match &hook.emit {
                Some(emit) => match emit(ext_type) {
                    Some(p) => p,
                    None => continue,
                },
                None => Vec::new(),
            };
            let record = ExtensionRecord::new(ext_type, payload).map_err(|_| {
                TlsError::BufferTooSmall {
                    needed: ExtensionRecord::MAX_PAYLOAD + 1,
                }
            })?;
            out.push(record);
        }
        Ok(out)
    }

    /// Hand a received extension to its parse hook. Returns `Ok(false)`
    /// when nothing is registered for the type.
    pub(crate) fn dispatch(&self, ext_type: u16, payload: &[u8]) -> std::result::Result<bool, TlsError> {
        let Some(parse) = self.hooks.get(&ext_type).and_then(|h| h.parse.as_ref()) else {
            return Ok(false);
        };
        debug!(ext_type, len = payload.len(), "dispatching extension to hook");
        parse(ext_type, payload).map_err(|Rejected| TlsError::ExtensionRejected(ext_type))?;
        Ok(true)
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.hooks.keys()).finish()
    }
}

/// Parse hook that rebuilds the [`ExtensionRecord`] and writes it to `sink`
/// as an armored `SERVERINFO FOR EXTENSION <type>` block.
///
/// A failing diagnostic write is logged and does not abort the handshake.
pub fn serverinfo_hook(sink: DiagnosticSink) -> ParseFn {
    Box::new(move |ext_type, payload| {
        let record = ExtensionRecord::new(ext_type, payload).map_err(|_| Rejected)?;
        if let Err(e) = sink.write_block(&record.to_armor()) {
            warn!(ext_type, error = %e, "failed to write extension diagnostics");
        }
        Ok(())
    })
}
