//! Vendor handshake extension hooks.
//!
//! Callers register per-type emit/parse callbacks in an
//! [`ExtensionRegistry`]; the TLS engine calls them while building the
//! ClientHello and while reading the server's flight. Received extensions
//! can be rebuilt into an [`ExtensionRecord`] and written, armored, to a
//! [`DiagnosticSink`].

pub mod armor;
pub mod diagnostic;
pub mod record;
pub mod registry;

pub use diagnostic::DiagnosticSink;
pub use record::ExtensionRecord;
pub use registry::{serverinfo_hook, EmitFn, ExtensionRegistry, ParseFn, Rejected};
