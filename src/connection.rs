//! Connection lifecycle: open, send, close.

use futures_util::SinkExt;
use serde::Serialize;
use tokio_util::codec::FramedWrite;
use tracing::{debug, error, warn};

use crate::codec::{Frame, FrameEncoder};
use crate::config::ConnectionConfig;
use crate::errors::ConnectionError;

mod client;

// Trait alias for boxed transport type used in Connection
pub trait TransportStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin> TransportStream for T {}

pub(crate) type Transport = Box<dyn TransportStream + Send>;

/// Lifecycle state of a [`Connection`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, never opened.
    Idle,
    /// An open attempt is in progress, or was cancelled midway.
    Opening,
    /// The upgrade request has been written; frames may be sent.
    Open,
    /// The transport has been released, or the last open attempt failed.
    Closed,
}

/// A send-only connection to a relay channel.
///
/// Every operation takes `&mut self` and runs to completion on the caller's task; there is no
/// background reader. Nothing is ever read back from the relay unless handshake verification
/// is enabled in the [`ConnectionConfig`], and then only the upgrade response.
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    framed: Option<FramedWrite<Transport, FrameEncoder>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create an idle connection. Nothing touches the network until [`Connection::open`].
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Idle,
            framed: None,
        }
    }

    /// Create a connection and open it immediately.
    ///
    /// # Errors
    /// Returns any error [`Connection::open`] returns.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ConnectionError> {
        let mut conn = Self::new(config);
        conn.open().await?;
        Ok(conn)
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Establish the transport and write the upgrade request.
    ///
    /// The TCP connect (and TLS handshake, when enabled) is bounded by the configured connect
    /// timeout. A fresh handshake key is generated on every call, so a closed or failed
    /// connection can be opened again. There is no automatic retry.
    ///
    /// # Errors
    /// Returns [`ConnectionError::AlreadyOpen`] if the connection is open,
    /// [`ConnectionError::Connect`] if the transport cannot be established and
    /// [`ConnectionError::Write`] if the request cannot be written. On failure the connection
    /// is left [`ConnectionState::Closed`].
    pub async fn open(&mut self) -> Result<(), ConnectionError> {
        self.begin_open()?;
        let result = match client::connect_transport(&self.config).await {
            Ok(stream) => client::perform_handshake(&self.config, stream).await,
            Err(err) => Err(err),
        };
        self.finish_open(result)
    }

    /// Run the handshake over an already established transport.
    ///
    /// # Errors
    /// Same as [`Connection::open`], minus the connect step.
    pub async fn open_on<S>(&mut self, stream: S) -> Result<(), ConnectionError>
    where
        S: TransportStream + Send + 'static,
    {
        self.begin_open()?;
        let result = client::perform_handshake(&self.config, Box::new(stream)).await;
        self.finish_open(result)
    }

    fn begin_open(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Open {
            warn!(address = %self.config.address(), "open called on an open connection");
            return Err(ConnectionError::AlreadyOpen);
        }
        self.framed = None;
        self.state = ConnectionState::Opening;
        debug!(
            address = %self.config.address(),
            channel = self.config.channel(),
            "Opening connection"
        );
        Ok(())
    }

    fn finish_open(
        &mut self,
        result: Result<FramedWrite<Transport, FrameEncoder>, ConnectionError>,
    ) -> Result<(), ConnectionError> {
        match result {
            Ok(framed) => {
                self.framed = Some(framed);
                self.state = ConnectionState::Open;
                debug!(address = %self.config.address(), "Connection open");
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Closed;
                error!(
                    address = %self.config.address(),
                    code = ?err.os_code(),
                    error = %err,
                    "Failed to open connection"
                );
                Err(err)
            }
        }
    }

    /// Serialize `data` to JSON and send it as one frame.
    ///
    /// Fire-and-forget: no acknowledgement is awaited. A failure leaves the state unchanged.
    ///
    /// # Errors
    /// Returns [`ConnectionError::NotOpen`] unless the connection is open,
    /// [`ConnectionError::Serialize`] if `data` cannot be serialized,
    /// [`ConnectionError::UnsupportedPayloadSize`] if the JSON exceeds 65535 bytes and
    /// [`ConnectionError::Write`] if the frame cannot be written in time.
    pub async fn send<T>(&mut self, data: &T) -> Result<(), ConnectionError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(data).map_err(|err| {
            error!(error = %err, "Failed to serialize message");
            ConnectionError::from(err)
        })?;
        self.send_raw(&payload).await
    }

    /// Send already-serialized bytes as one frame.
    ///
    /// # Errors
    /// Same as [`Connection::send`], minus serialization.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        let write_timeout = self.config.write_timeout();
        let (ConnectionState::Open, Some(framed)) = (self.state, self.framed.as_mut()) else {
            warn!(state = ?self.state, "Send on a connection that is not open");
            return Err(ConnectionError::NotOpen(self.state));
        };

        let len = payload.len();
        let result = match tokio::time::timeout(write_timeout, framed.send(Frame::new(payload)))
            .await
        {
            Ok(res) => res.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::Write(client::timed_out(
                "frame write timed out",
            ))),
        };
        match &result {
            Ok(()) => debug!(len, "Message sent"),
            Err(err) => error!(len, code = ?err.os_code(), error = %err, "Failed to send message"),
        }
        result
    }

    /// Flush and release the transport.
    ///
    /// Calling this on a connection that holds no transport (idle or already closed) is a no-op
    /// returning `Ok(())`.
    ///
    /// # Errors
    /// Returns [`ConnectionError::Write`] if the flush or shutdown fails. The transport is
    /// released and the state is [`ConnectionState::Closed`] regardless.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(mut framed) = self.framed.take() else {
            if self.state == ConnectionState::Opening {
                self.state = ConnectionState::Closed;
            }
            debug!(state = ?self.state, "Close on a connection without transport");
            return Ok(());
        };
        self.state = ConnectionState::Closed;

        let result = match tokio::time::timeout(
            self.config.write_timeout(),
            SinkExt::<Frame>::close(&mut framed),
        )
        .await
        {
            Ok(res) => res.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::Write(client::timed_out(
                "shutdown timed out",
            ))),
        };
        drop(framed);

        match &result {
            Ok(()) => debug!(address = %self.config.address(), "Connection closed"),
            Err(err) => error!(
                address = %self.config.address(),
                code = ?err.os_code(),
                error = %err,
                "Failed to close connection cleanly"
            ),
        }
        result
    }
}
