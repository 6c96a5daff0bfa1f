//! Socket transport: the [`Connector`]/[`Socket`] seam and its tokio-tungstenite implementation.
//!
//! A [`Socket`] reports one of three [`SocketState`]s. Network level failures (reset, EOF,
//! I/O errors) are not surfaced as errors by [`Socket::receive`]; they move the socket to
//! [`SocketState::Aborted`] so the keep-alive loop can replace it in place.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::WsError;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SocketState {
    Open,
    /// The transport failed without a close handshake; the socket can be replaced
    Aborted,
    /// Closed by either side
    Closed,
}

/// Where and how to (re)open the push socket.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketTarget {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub buffer_size: usize,
}

impl SocketTarget {
    #[must_use]
    pub fn new(url: Url, headers: Vec<(String, String)>, buffer_size: usize) -> Self {
        Self {
            url,
            headers,
            buffer_size,
        }
    }
}

#[async_trait]
pub trait Socket: Send + Sync {
    fn state(&self) -> SocketState;

    /// Next binary message. `Ok(None)` means nothing was delivered, check [`Socket::state`].
    async fn receive(&self) -> Result<Option<Vec<u8>>>;

    async fn send(&self, data: Vec<u8>) -> Result<()>;

    /// Closes the socket. Pending and later receives return `Ok(None)`.
    async fn close(&self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, target: &SocketTarget) -> Result<Arc<dyn Socket>>;
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, target: &SocketTarget) -> Result<Arc<dyn Socket>> {
        let mut request = target.url.as_str().into_client_request()?;
        for (name, value) in &target.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_e| WsError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_e| WsError::InvalidHeader(name.as_str().to_owned()))?;
            request.headers_mut().insert(name, value);
        }

        let config = WebSocketConfig::default().read_buffer_size(target.buffer_size);
        let (stream, _) = connect_async_with_config(request, Some(config), false).await?;

        tracing::debug!(host = target.url.host_str(), "push socket opened");
        Ok(Arc::new(TungsteniteSocket::new(stream)))
    }
}

struct TungsteniteSocket {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
    state: watch::Sender<SocketState>,
    closed: CancellationToken,
}

impl TungsteniteSocket {
    fn new(stream: WsStream) -> Self {
        let (writer, reader) = stream.split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            state: watch::Sender::new(SocketState::Open),
            closed: CancellationToken::new(),
        }
    }

    /// Moves to `next` unless the socket has already been closed.
    fn transition(&self, next: SocketState) {
        self.state.send_if_modified(|state| {
            if *state == SocketState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}

/// Failures that mean the peer went away, as opposed to protocol misuse.
fn is_abort(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::Io(_)
            | tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[async_trait]
impl Socket for TungsteniteSocket {
    fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;

        loop {
            if self.state() != SocketState::Open {
                return Ok(None);
            }

            let next = tokio::select! {
                () = self.closed.cancelled() => return Ok(None),
                next = reader.next() => next,
            };

            match next {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "push server closed the socket");
                    self.transition(SocketState::Closed);
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) if is_abort(&e) => {
                    tracing::debug!(error = %e, "push socket aborted");
                    self.transition(SocketState::Aborted);
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.transition(SocketState::Aborted);
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&self, data: Vec<u8>) -> Result<()> {
        if self.state() != SocketState::Open {
            return Err(WsError::NotConnected.into());
        }

        let mut writer = self.writer.lock().await;
        writer.send(Message::Binary(data.into())).await.map_err(|e| {
            if is_abort(&e) {
                self.transition(SocketState::Aborted);
            }
            e.into()
        })
    }

    async fn close(&self) {
        self.closed.cancel();
        let previous = self.state.send_replace(SocketState::Closed);
        if previous == SocketState::Open {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.close().await {
                tracing::trace!(error = %e, "close handshake failed");
            }
        }
    }
}
