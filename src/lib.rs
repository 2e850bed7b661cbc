//! Send-only WebSocket client for tinymsg relays.
//!
//! A [`Connection`] writes the opening handshake to the relay and then pushes JSON messages to
//! the channel named in its [`ConnectionConfig`], one unmasked frame per message. Nothing is
//! read back: the handshake is fire-and-forget unless verification is explicitly enabled.
//!
//! Payloads are limited to 65535 bytes; larger messages fail with
//! [`ConnectionError::UnsupportedPayloadSize`] instead of being truncated.
pub mod codec;
pub(crate) mod config;
pub(crate) mod connection;
pub(crate) mod errors;
pub mod handshake;

pub use codec::{Frame, FrameEncoder, Masking};
pub use config::{ConnectionConfig, origin_for};
pub use connection::{Connection, ConnectionState, TransportStream};
pub use errors::{CodecError, ConnectionError};
