//! Error types for the tinymsg crate.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced by the frame codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload needs the 64-bit extended length encoding, which this client does not emit.
    #[error("Payload too big: {0} bytes (at most 65535 supported)")]
    UnsupportedPayloadSize(usize),
    /// The OS random source could not seed the masking key generator.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),
    /// An underlying I/O error occurred while writing frames.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the connection lifecycle and handshake logic.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport could not be established (resolution, refusal, timeout or TLS failure).
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        /// The `host:port` pair, prefixed with `ssl://` for TLS transports.
        address: String,
        /// The underlying transport error.
        #[source]
        source: std::io::Error,
    },
    /// The host is not a valid DNS name or IP address for TLS.
    #[error("Invalid DNS name for TLS: {0}")]
    InvalidDnsName(String),
    /// Writing the handshake request or a frame failed.
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),
    /// The payload does not fit in a 16-bit length field.
    #[error("Payload too big: {0} bytes (at most 65535 supported)")]
    UnsupportedPayloadSize(usize),
    /// The value handed to `send` could not be serialized to JSON.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The OS random source failed.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),
    /// A connection parameter violates its invariant.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The operation requires an open connection.
    #[error("Connection is not open (state: {0:?})")]
    NotOpen(ConnectionState),
    /// `open` was called on a connection that is already open.
    #[error("Connection is already open")]
    AlreadyOpen,
    /// Failed to read the handshake response from the server.
    #[error("Failed to read handshake response")]
    ReadHandshakeFailed,
    /// The handshake response from the server was too large.
    #[error("Handshake response too large")]
    HandshakeResponseTooLarge,
    /// Failed to parse the handshake response.
    #[error("Failed to parse handshake response")]
    ParseHandshakeFailed,
    /// The handshake response was incomplete.
    #[error("Incomplete handshake response")]
    IncompleteHandshakeResponse,
    /// The handshake response was missing or had an invalid status code.
    #[error("Handshake failed: missing or invalid status code")]
    HandshakeMissingStatus,
    /// The handshake response was missing or had an invalid header.
    #[error("Handshake failed: missing or invalid header: {0}")]
    HandshakeMissingHeader(&'static str),
    /// The handshake response had an invalid Sec-WebSocket-Accept value.
    #[error("Handshake failed: invalid Sec-WebSocket-Accept value")]
    HandshakeInvalidAccept,
}

impl ConnectionError {
    /// The OS error number behind this error, if any.
    #[must_use]
    pub fn os_code(&self) -> Option<i32> {
        match self {
            ConnectionError::Connect { source, .. } | ConnectionError::Write(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

impl From<CodecError> for ConnectionError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::UnsupportedPayloadSize(len) => ConnectionError::UnsupportedPayloadSize(len),
            CodecError::Entropy(msg) => ConnectionError::Entropy(msg),
            CodecError::Io(e) => ConnectionError::Write(e),
        }
    }
}
