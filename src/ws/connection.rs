//! Socket protocol engine and keep-alive loop.
//!
//! Both loops share one [`SocketHandle`]. The keep-alive loop (and the receive loop, when it
//! notices first) replaces an aborted socket under the handle's write lock, so the receive loop
//! only ever sees the stale socket or the fresh one, never a half-replaced handle.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use prost::Message as _;
use tokio::sync::RwLock;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use super::error::WsError;
use super::socket::{Connector, Socket, SocketState, SocketTarget};
use super::traits::MessageHandler;
use super::types::{Ack, PING, PushFrame};
use crate::Result;
use crate::config::{Settings, log_at};
use crate::error::Error;
use crate::exception::Exceptions;

/// Guarded slot holding the live socket plus what is needed to rebuild it.
pub struct SocketHandle {
    connector: Arc<dyn Connector>,
    target: SocketTarget,
    open_timeout: Duration,
    current: RwLock<Option<Arc<dyn Socket>>>,
}

impl SocketHandle {
    /// Opens the first socket for `target`.
    pub async fn open(
        connector: Arc<dyn Connector>,
        target: SocketTarget,
        open_timeout: Duration,
    ) -> Result<Self> {
        let socket = open_with_timeout(connector.as_ref(), &target, open_timeout).await?;
        Ok(Self {
            connector,
            target,
            open_timeout,
            current: RwLock::new(Some(socket)),
        })
    }

    #[must_use]
    pub fn target(&self) -> &SocketTarget {
        &self.target
    }

    pub async fn current(&self) -> Option<Arc<dyn Socket>> {
        self.current.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.current()
            .await
            .is_some_and(|socket| socket.state() == SocketState::Open)
    }

    /// `true` once the handle was closed or the held socket was closed by either side.
    pub async fn is_closed(&self) -> bool {
        self.current()
            .await
            .is_none_or(|socket| socket.state() == SocketState::Closed)
    }

    /// Replaces an aborted socket with a fresh one opened against the same target.
    ///
    /// Returns `Ok(true)` if a reconnect happened. On failure the handle is left empty, which
    /// both loops treat as closed.
    pub async fn reconnect_if_aborted(&self) -> Result<bool> {
        let mut slot = self.current.write().await;
        let Some(stale) = slot.as_ref() else {
            return Ok(false);
        };
        if stale.state() != SocketState::Aborted {
            return Ok(false);
        }

        stale.close().await;
        *slot = None;
        let fresh =
            open_with_timeout(self.connector.as_ref(), &self.target, self.open_timeout).await?;
        *slot = Some(fresh);

        Ok(true)
    }

    pub async fn close(&self) {
        let socket = self.current.write().await.take();
        if let Some(socket) = socket {
            socket.close().await;
        }
    }
}

async fn open_with_timeout(
    connector: &dyn Connector,
    target: &SocketTarget,
    open_timeout: Duration,
) -> Result<Arc<dyn Socket>> {
    timeout(open_timeout, connector.open(target))
        .await
        .map_err(|_elapsed| WsError::Timeout)?
}

/// The two loops of a connected session.
#[derive(Clone)]
pub struct Connection {
    handle: Arc<SocketHandle>,
    handler: Arc<dyn MessageHandler>,
    settings: Arc<Settings>,
    exceptions: Exceptions,
    token: CancellationToken,
}

impl Connection {
    /// `token` must be owned by this session; the receive loop cancels it when it exits so the
    /// keep-alive loop follows.
    #[must_use]
    pub fn new(
        handle: Arc<SocketHandle>,
        handler: Arc<dyn MessageHandler>,
        settings: Arc<Settings>,
        exceptions: Exceptions,
        token: CancellationToken,
    ) -> Self {
        Self {
            handle,
            handler,
            settings,
            exceptions,
            token,
        }
    }

    #[must_use]
    pub fn handle(&self) -> &Arc<SocketHandle> {
        &self.handle
    }

    /// Receives, acknowledges and dispatches frames until cancelled or the socket closes.
    ///
    /// A transport fault closes the socket, is published on the exception channel and is
    /// returned.
    pub async fn receive_loop(&self) -> Result<()> {
        let result = self.receive_frames().await;
        self.token.cancel();

        if let Err(e) = result {
            self.handle.close().await;
            log_at!(self.settings, Error, error = %e, "push socket crashed");
            return Err(Error::shared(self.exceptions.report(e)));
        }
        Ok(())
    }

    async fn receive_frames(&self) -> Result<()> {
        loop {
            if self.token.is_cancelled() {
                log_at!(self.settings, Information, "connection cancelled, stopping receive loop");
                self.handle.close().await;
                return Ok(());
            }
            if self.handle.is_closed().await {
                log_at!(self.settings, Information, "push socket closed, stopping receive loop");
                return Ok(());
            }
            if self.handle.reconnect_if_aborted().await? {
                log_at!(self.settings, Information, "push socket reconnected");
            }

            let Some(socket) = self.handle.current().await else {
                return Ok(());
            };
            let data = tokio::select! {
                () = self.token.cancelled() => continue,
                data = socket.receive() => data?,
            };

            if let Some(data) = data {
                self.process(&data).await?;
            }
        }
    }

    /// Decodes one binary message. Decode and handler failures are logged, not returned.
    async fn process(&self, data: &[u8]) -> Result<()> {
        if self.settings.print_message_data {
            tracing::info!(frame = %BASE64.encode(data), "push frame");
        }

        let frame = match PushFrame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                log_at!(self.settings, Warning, error = %e, "dropping undecodable push frame");
                return Ok(());
            }
        };
        let response = match frame.response() {
            Ok(Some(response)) => response,
            Ok(None) => return Ok(()),
            Err(e) => {
                log_at!(self.settings, Warning, seq_id = frame.seq_id, error = %e, "dropping undecodable response");
                return Ok(());
            }
        };

        if self.token.is_cancelled() {
            return Ok(());
        }
        if response.needs_ack {
            self.acknowledge(frame.seq_id).await?;
        }
        if self.token.is_cancelled() {
            return Ok(());
        }

        if let Err(e) = self.handler.handle(&response) {
            log_at!(self.settings, Warning, seq_id = frame.seq_id, error = %e, "message handler failed");
        }
        Ok(())
    }

    async fn acknowledge(&self, seq_id: u64) -> Result<()> {
        let socket = self
            .handle
            .current()
            .await
            .filter(|socket| socket.state() == SocketState::Open);
        let Some(socket) = socket else {
            log_at!(self.settings, Verbose, seq_id, "socket not open, skipping ack");
            return Ok(());
        };

        match socket.send(Ack::new(seq_id).encode_to_vec()).await {
            // The next receive iteration replaces the aborted socket
            Err(e) if socket.state() == SocketState::Aborted => {
                log_at!(
                    self.settings,
                    Warning,
                    seq_id,
                    error = %e,
                    "push socket aborted while acknowledging"
                );
                Ok(())
            }
            result => result,
        }
    }

    /// Every polling interval: replace an aborted socket, then ping. Ends quietly on
    /// cancellation or once the handle is closed.
    pub async fn keep_alive_loop(&self) -> Result<()> {
        let mut ticker = interval(self.settings.polling_interval);

        loop {
            tokio::select! {
                () = self.token.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            if self.handle.is_closed().await {
                return Ok(());
            }
            match self.handle.reconnect_if_aborted().await {
                Ok(true) => log_at!(self.settings, Information, "push socket reconnected"),
                Ok(false) => {}
                Err(e) => {
                    self.handle.close().await;
                    log_at!(self.settings, Error, error = %e, "failed to reconnect push socket");
                    return Err(Error::shared(self.exceptions.report(e)));
                }
            }
            if self.token.is_cancelled() {
                return Ok(());
            }

            let Some(socket) = self.handle.current().await else {
                return Ok(());
            };
            if socket.state() != SocketState::Open {
                continue;
            }
            if let Err(e) = socket.send(PING.to_vec()).await {
                log_at!(self.settings, Warning, error = %e, "ping failed");
            }
        }
    }
}
