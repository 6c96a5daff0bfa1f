//! The message-handler capability the live client dispatches into.

use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::error::WsError;
use super::types::Response;

/// Broadcast channel capacity for [`ChannelHandler`].
const BROADCAST_CAPACITY: usize = 1024;

/// Consumes decoded [`Response`]s, once per frame that carries a payload.
///
/// Errors returned from the steady-state receive loop are logged and the loop continues.
/// Errors while handling the initial response abort `start`.
///
/// Any `Fn(&Response) -> crate::Result<()>` closure is a handler:
///
/// ```
/// use webcast_client_sdk::ws::{MessageHandler, types::Response};
///
/// let handler = |response: &Response| -> webcast_client_sdk::Result<()> {
///     for message in &response.messages {
///         println!("{}", message.method);
///     }
///     Ok(())
/// };
/// handler.handle(&Response::default()).unwrap();
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, response: &Response) -> crate::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Response) -> crate::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, response: &Response) -> crate::Result<()> {
        self(response)
    }
}

/// [`MessageHandler`] that fans every response out to any number of subscribers.
#[derive(Clone, Debug)]
pub struct ChannelHandler {
    tx: broadcast::Sender<Arc<Response>>,
}

impl Default for ChannelHandler {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl ChannelHandler {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Each call returns a new independent receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Response>> {
        self.tx.subscribe()
    }

    /// Responses as a stream. A slow consumer gets a [`WsError::Lagged`] item and the stream
    /// ends; the stream also ends once every handler clone is dropped.
    pub fn stream(&self) -> impl Stream<Item = crate::Result<Arc<Response>>> + use<> {
        let mut rx = self.tx.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(response) => yield response,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Subscription lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

impl MessageHandler for ChannelHandler {
    fn handle(&self, response: &Response) -> crate::Result<()> {
        // Nobody subscribed yet is fine
        _ = self.tx.send(Arc::new(response.clone()));
        Ok(())
    }
}
