//! Transport establishment and the client side of the opening handshake.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_util::codec::FramedWrite;
use tracing::debug;

use crate::codec::FrameEncoder;
use crate::config::ConnectionConfig;
use crate::connection::Transport;
use crate::errors::ConnectionError;
use crate::handshake::{self, HandshakeKey};

pub(crate) fn timed_out(what: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, what)
}

/// Connect TCP, then TLS when configured, within the connect timeout.
pub(super) async fn connect_transport(
    config: &ConnectionConfig,
) -> Result<Transport, ConnectionError> {
    match tokio::time::timeout(config.connect_timeout(), establish(config)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Connect {
            address: config.address(),
            source: timed_out("connect timed out"),
        }),
    }
}

async fn establish(config: &ConnectionConfig) -> Result<Transport, ConnectionError> {
    let connect_failed = |source| ConnectionError::Connect {
        address: config.address(),
        source,
    };
    let tcp_stream = TcpStream::connect((config.host(), config.port()))
        .await
        .map_err(connect_failed)?;
    if !config.use_tls() {
        return Ok(Box::new(tcp_stream));
    }

    let server_name = ServerName::try_from(config.host().to_owned())
        .map_err(|_| ConnectionError::InvalidDnsName(config.host().to_owned()))?;
    let stream = tls_connector()
        .connect(server_name, tcp_stream)
        .await
        .map_err(connect_failed)?;
    debug!(host = config.host(), "TLS session established");
    Ok(Box::new(stream))
}

fn tls_connector() -> TlsConnector {
    let root_store = webpki_roots::TLS_SERVER_ROOTS
        .iter()
        .cloned()
        .collect::<RootCertStore>();
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Write the upgrade request over `stream` and wrap it for frame writes.
///
/// The response is only read when verification is enabled in `config`.
pub(super) async fn perform_handshake(
    config: &ConnectionConfig,
    mut stream: Transport,
) -> Result<FramedWrite<Transport, FrameEncoder>, ConnectionError> {
    let key = HandshakeKey::generate()?;
    let request = handshake::build_request(config, &key);

    match tokio::time::timeout(
        config.write_timeout(),
        write_all_flush(&mut stream, request.as_bytes()),
    )
    .await
    {
        Ok(result) => result.map_err(ConnectionError::Write)?,
        Err(_) => {
            return Err(ConnectionError::Write(timed_out(
                "handshake write timed out",
            )));
        }
    }

    if config.verifies_handshake() {
        let response = tokio::time::timeout(
            config.connect_timeout(),
            handshake::read_response(&mut stream),
        )
        .await
        .map_err(|_| ConnectionError::ReadHandshakeFailed)??;
        handshake::verify_response(&response, &key)?;
        debug!("Handshake response verified");
    }

    let encoder = FrameEncoder::new(config.masking())?;
    Ok(FramedWrite::new(stream, encoder))
}

async fn write_all_flush(stream: &mut Transport, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await
}
