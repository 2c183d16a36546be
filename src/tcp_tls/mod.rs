//! TLS 1.3 over a byte-stream transport.
//!
//! [`TlsConnection`] is the sans-IO record layer around the handshake
//! engine; [`TlsStream`] drives it over a blocking [`Transport`](crate::transport::Transport).

pub mod connection;
pub mod record;
pub mod stream;

pub use connection::{TlsConnection, TlsEvent};
pub use stream::TlsStream;
