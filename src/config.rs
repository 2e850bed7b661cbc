//! Connection parameters.

use std::time::Duration;

use crate::codec::Masking;
use crate::errors::ConnectionError;

/// Default bound on establishing the transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default bound on a single handshake, frame or shutdown write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_PORT: u16 = 80;
const DEFAULT_TLS_PORT: u16 = 443;
const TLS_PREFIX: &str = "ssl://";

/// Immutable parameters for one relay connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    channel: String,
    host: String,
    use_tls: bool,
    port: u16,
    origin: String,
    masking: Masking,
    verify_handshake: bool,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl ConnectionConfig {
    /// Create a configuration.
    ///
    /// `port` defaults to 443 when `use_tls` is set and to 80 otherwise. `channel` is announced
    /// verbatim as `Sec-WebSocket-Protocol` and may be empty. `origin` is sent as the `Origin`
    /// header; see [`origin_for`] to derive it from a request context.
    ///
    /// # Errors
    /// Returns [`ConnectionError::InvalidConfig`] if the host is empty, the port is zero, or any
    /// of `channel`, `host` and `origin` contains a control character.
    pub fn new<C, H, O>(
        channel: C,
        host: H,
        use_tls: bool,
        port: Option<u16>,
        origin: O,
    ) -> Result<Self, ConnectionError>
    where
        C: Into<String>,
        H: Into<String>,
        O: Into<String>,
    {
        let channel = channel.into();
        let host = host.into();
        // IPv6 literals are stored bare; brackets are added back where the wire format wants them.
        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(bare) => bare.to_owned(),
            None => host,
        };
        let origin = origin.into();

        if host.is_empty() {
            return Err(ConnectionError::InvalidConfig("host must not be empty"));
        }
        if has_control_chars(&host) {
            return Err(ConnectionError::InvalidConfig(
                "host contains control characters",
            ));
        }
        if has_control_chars(&channel) {
            return Err(ConnectionError::InvalidConfig(
                "channel contains control characters",
            ));
        }
        if has_control_chars(&origin) {
            return Err(ConnectionError::InvalidConfig(
                "origin contains control characters",
            ));
        }
        let port = match port {
            Some(0) => return Err(ConnectionError::InvalidConfig("port must be positive")),
            Some(port) => port,
            None if use_tls => DEFAULT_TLS_PORT,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            channel,
            host,
            use_tls,
            port,
            origin,
            masking: Masking::default(),
            verify_handshake: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Create a configuration from a `ws://` or `wss://` URI.
    ///
    /// Only the scheme, host and port of the URI are used; the handshake always requests `/`.
    ///
    /// # Errors
    /// Returns [`ConnectionError::InvalidConfig`] for other schemes, a missing host, or any of
    /// the conditions checked by [`ConnectionConfig::new`].
    pub fn from_uri<C, O>(uri: &http::Uri, channel: C, origin: O) -> Result<Self, ConnectionError>
    where
        C: Into<String>,
        O: Into<String>,
    {
        let use_tls = match uri.scheme_str() {
            Some("ws") => false,
            Some("wss") => true,
            Some(_) => {
                return Err(ConnectionError::InvalidConfig(
                    "unsupported URI scheme for WebSocket",
                ));
            }
            None => return Err(ConnectionError::InvalidConfig("missing URI scheme")),
        };
        let host = uri
            .host()
            .ok_or(ConnectionError::InvalidConfig("missing host"))?;
        Self::new(channel, host, use_tls, uri.port_u16(), origin)
    }

    /// Set the frame masking mode.
    #[must_use]
    pub fn with_masking(mut self, masking: Masking) -> Self {
        self.masking = masking;
        self
    }

    /// Read and validate the server's upgrade response during `open`.
    ///
    /// Off by default: the relay is written to fire-and-forget.
    #[must_use]
    pub fn with_handshake_verification(mut self, enabled: bool) -> Self {
        self.verify_handshake = enabled;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The host as passed to the resolver; IPv6 literals come without brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The host as written in the `Host` header, with IPv6 literals bracketed.
    #[must_use]
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    #[must_use]
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn masking(&self) -> Masking {
        self.masking
    }

    #[must_use]
    pub fn verifies_handshake(&self) -> bool {
        self.verify_handshake
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// `"ssl://"` for TLS transports, empty otherwise.
    #[must_use]
    pub fn protocol_prefix(&self) -> &'static str {
        if self.use_tls { TLS_PREFIX } else { "" }
    }

    /// Transport address used in logs and errors, e.g. `ssl://example.com:443`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}{}:{}", self.protocol_prefix(), self.host_header(), self.port)
    }
}

/// Build an `Origin` value from the scheme and host of the calling request context.
#[must_use]
pub fn origin_for(secure: bool, host: &str) -> String {
    let scheme = if secure { "https" } else { "http" };
    format!("{scheme}://{host}")
}

fn has_control_chars(value: &str) -> bool {
    value.chars().any(char::is_control)
}
