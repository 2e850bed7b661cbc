//! Opening handshake: key generation, the upgrade request, and opt-in response verification.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as base64;
use http::{Response, StatusCode};
use rand::TryRngCore as _;
use tokio::io::AsyncReadExt as _;
use tokio_util::bytes::BytesMut;

use crate::config::ConnectionConfig;
use crate::errors::ConnectionError;

const KEY_LEN: usize = 16;
const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_RESPONSE_LEN: usize = 8192;

/// A base64-encoded `Sec-WebSocket-Key`, generated fresh for every handshake attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeKey(String);

impl HandshakeKey {
    /// Draw 16 bytes from the OS random source and base64-encode them.
    ///
    /// # Errors
    /// Returns [`ConnectionError::Entropy`] if the OS random source fails. There is no
    /// fallback to a weaker generator.
    pub fn generate() -> Result<Self, ConnectionError> {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| ConnectionError::Entropy(e.to_string()))?;
        Ok(Self(base64.encode(bytes)))
    }

    /// Wrap a key that is already base64-encoded, e.g. one read back from a request.
    pub fn from_encoded(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `Sec-WebSocket-Accept` value a conforming server answers this key with.
    #[must_use]
    pub fn expected_accept(&self) -> String {
        use sha1::{Digest, Sha1};
        let mut sha1 = Sha1::new();
        sha1.update(self.0.as_bytes());
        sha1.update(ACCEPT_GUID);
        base64.encode(sha1.finalize())
    }
}

impl std::fmt::Display for HandshakeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compose the upgrade request.
///
/// Header order and capitalisation are fixed; the paired relay and the tests rely on the exact
/// byte sequence. The channel is inserted verbatim as `Sec-WebSocket-Protocol`.
#[must_use]
pub fn build_request(config: &ConnectionConfig, key: &HandshakeKey) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Origin: {origin}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Protocol: {channel}\r\n\
         \r\n",
        host = config.host_header(),
        origin = config.origin(),
        channel = config.channel(),
    )
}

/// Read the server's handshake response.
///
/// Bytes are accumulated until `httparse` sees a complete header block. Anything the server
/// sends after the blank line stays unread in the buffer and is dropped.
pub(crate) async fn read_response<S>(stream: &mut S) -> Result<Response<()>, ConnectionError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(response) = parse_response(&buf)? {
            return Ok(response);
        }
        // Header block still incomplete after MAX_RESPONSE_LEN bytes.
        if buf.len() >= MAX_RESPONSE_LEN {
            return Err(ConnectionError::HandshakeResponseTooLarge);
        }
        let n = stream
            .read_buf(&mut buf)
            .await
            .map_err(|_| ConnectionError::ReadHandshakeFailed)?;
        if n == 0 {
            return Err(if buf.is_empty() {
                ConnectionError::ReadHandshakeFailed
            } else {
                ConnectionError::IncompleteHandshakeResponse
            });
        }
    }
}

/// Parse a complete response head, or `None` if more bytes are needed.
fn parse_response(raw: &[u8]) -> Result<Option<Response<()>>, ConnectionError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut res = httparse::Response::new(&mut headers);
    let status = res
        .parse(raw)
        .map_err(|_| ConnectionError::ParseHandshakeFailed)?;
    if status.is_partial() {
        return Ok(None);
    }
    let code = res.code.ok_or(ConnectionError::HandshakeMissingStatus)?;
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(code).map_err(|_| ConnectionError::HandshakeMissingStatus)?);
    for h in res.headers.iter() {
        builder = builder.header(h.name, h.value);
    }
    builder
        .body(())
        .map(Some)
        .map_err(|_| ConnectionError::ParseHandshakeFailed)
}

/// Check that `response` accepts the upgrade requested with `key`.
///
/// # Errors
/// Returns the first handshake error found: wrong status, missing `Upgrade`/`Connection`
/// headers, or a `Sec-WebSocket-Accept` that does not match `key`.
pub fn verify_response(response: &Response<()>, key: &HandshakeKey) -> Result<(), ConnectionError> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(ConnectionError::HandshakeMissingStatus);
    }
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
    };
    if header("Upgrade").as_deref() != Some("websocket") {
        return Err(ConnectionError::HandshakeMissingHeader("Upgrade"));
    }
    // Connection may list several tokens, e.g. "keep-alive, Upgrade".
    let upgrades = header("Connection")
        .is_some_and(|v| v.split(',').any(|token| token.trim() == "upgrade"));
    if !upgrades {
        return Err(ConnectionError::HandshakeMissingHeader("Connection"));
    }
    let accept = response
        .headers()
        .get("Sec-WebSocket-Accept")
        .and_then(|v| v.to_str().ok());
    if accept != Some(key.expected_accept().as_str()) {
        return Err(ConnectionError::HandshakeInvalidAccept);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use base64::Engine as _;

    use super::*;

    fn sample_key() -> HandshakeKey {
        HandshakeKey::from_encoded("dGhlIHNhbXBsZSBub25jZQ==")
    }

    fn upgrade_response(accept: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn key_decodes_to_sixteen_bytes() {
        let key = HandshakeKey::generate().unwrap();
        assert_eq!(key.as_str().len(), 24);
        let decoded = base64.decode(key.as_str()).unwrap();
        assert_eq!(decoded.len(), KEY_LEN);
    }

    #[test]
    fn keys_are_not_repeated() {
        let keys: HashSet<String> = (0..10_000)
            .map(|_| HandshakeKey::generate().unwrap().to_string())
            .collect();
        assert_eq!(keys.len(), 10_000);
    }

    #[test]
    fn accept_matches_rfc_example() {
        assert_eq!(sample_key().expected_accept(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn request_is_byte_exact() {
        let config =
            ConnectionConfig::new("room1", "example.com", false, None, "http://app.test").unwrap();
        let req = build_request(&config, &sample_key());
        assert_eq!(
            req,
            "GET / HTTP/1.1\r\n\
             Host: example.com\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Origin: http://app.test\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Protocol: room1\r\n\
             \r\n"
        );
    }

    #[test]
    fn request_headers_appear_once_in_order() {
        let config = ConnectionConfig::new("", "relay.test", true, Some(8443), "").unwrap();
        let req = build_request(&config, &HandshakeKey::generate().unwrap());
        assert!(req.ends_with("\r\n\r\n"));
        assert_eq!(req.matches("\r\n\r\n").count(), 1);

        let names: Vec<&str> = req
            .lines()
            .skip(1)
            .take_while(|l| !l.is_empty())
            .filter_map(|l| l.split_once(':').map(|(name, _)| name))
            .collect();
        assert_eq!(
            names,
            [
                "Host",
                "Connection",
                "Upgrade",
                "Origin",
                "Sec-WebSocket-Version",
                "Sec-WebSocket-Key",
                "Sec-WebSocket-Protocol",
            ]
        );
        assert!(req.contains("Host: relay.test\r\n"));
        assert!(req.contains("Sec-WebSocket-Protocol: \r\n"));
    }

    #[test]
    fn accepts_valid_upgrade_response() {
        let key = sample_key();
        let response = parse_response(&upgrade_response(&key.expected_accept()))
            .unwrap()
            .unwrap();
        verify_response(&response, &key).unwrap();
    }

    #[test]
    fn rejects_wrong_accept() {
        let response = parse_response(&upgrade_response("bm9wZQ=="))
            .unwrap()
            .unwrap();
        assert!(matches!(
            verify_response(&response, &sample_key()),
            Err(ConnectionError::HandshakeInvalidAccept)
        ));
    }

    #[test]
    fn rejects_non_101_status() {
        let response =
            parse_response(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .unwrap()
                .unwrap();
        assert!(matches!(
            verify_response(&response, &sample_key()),
            Err(ConnectionError::HandshakeMissingStatus)
        ));
    }

    #[test]
    fn partial_head_asks_for_more_bytes() {
        assert!(matches!(
            parse_response(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: web"),
            Ok(None)
        ));
    }

    #[test]
    fn ipv6_host_is_bracketed_in_host_header() {
        let config = ConnectionConfig::new("room1", "::1", false, Some(9000), "").unwrap();
        let req = build_request(&config, &sample_key());
        assert!(req.contains("\r\nHost: [::1]\r\n"));
    }

    #[tokio::test]
    async fn eof_inside_head_is_incomplete() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: web")
                .await
                .unwrap();
        });
        assert!(matches!(
            read_response(&mut client).await,
            Err(ConnectionError::IncompleteHandshakeResponse)
        ));
    }

    #[tokio::test]
    async fn unterminated_head_is_too_large() {
        let (mut client, mut server) = tokio::io::duplex(1 << 14);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut raw = b"HTTP/1.1 101 Switching Protocols\r\nX-Filler: ".to_vec();
            raw.extend(std::iter::repeat_n(b'a', MAX_RESPONSE_LEN + 100));
            server.write_all(&raw).await.unwrap();
            server
        });
        assert!(matches!(
            read_response(&mut client).await,
            Err(ConnectionError::HandshakeResponseTooLarge)
        ));
    }

    #[tokio::test]
    async fn reads_response_from_stream() {
        let key = sample_key();
        let (mut client, mut server) = tokio::io::duplex(1024);
        let raw = upgrade_response(&key.expected_accept());
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(&raw).await.unwrap();
        });
        let response = read_response(&mut client).await.unwrap();
        verify_response(&response, &key).unwrap();
    }
}
