//! Asynchronous exception channel.
//!
//! Failures on background loops, and the quiet or non-fatal failures of `start`, are published
//! here so a caller that is not awaiting the loops still observes them. Every subscriber sees
//! every event in publication order.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::Error;

const EXCEPTION_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct Exceptions {
    tx: broadcast::Sender<Arc<Error>>,
}

impl Default for Exceptions {
    fn default() -> Self {
        Self::new(EXCEPTION_CAPACITY)
    }
}

impl Exceptions {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Each call returns an independent receiver that sees events published after it was created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Error>> {
        self.tx.subscribe()
    }

    /// Publishes `error` and hands back the shared copy.
    pub fn report(&self, error: Error) -> Arc<Error> {
        let error = Arc::new(error);
        // No subscribers is not a failure
        _ = self.tx.send(Arc::clone(&error));
        error
    }
}
