//! TLS 1.3 client handshake: messages, extensions, key schedule and the
//! handshake state machine.
//!
//! Nothing here frames records or touches sockets; [`crate::tcp_tls`] puts
//! the engine on a byte stream.

pub mod alert;
pub mod extensions;
pub mod handshake;
pub mod key_schedule_tls;
pub mod messages;
pub mod transcript;

pub use alert::AlertDescription;
pub use handshake::{ClientHandshake, ClientHelloConfig, HandshakeEntropy, HandshakeOutput};
pub use messages::CipherSuite;
