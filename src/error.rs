use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// HTTP method type, re-exported for use with error inspection.
pub use reqwest::Method;
/// HTTP status code type, re-exported for use with error inspection.
pub use reqwest::StatusCode;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to non-successful HTTP call
    Status,
    /// Error related to invalid input handed to the client
    Validation,
    /// Internal error from dependencies
    Internal,
    /// Error related to WebSocket connections
    WebSocket,
    /// Failed to fetch room id, room info or the gift catalog
    Fetch,
    /// Failed to establish (or refused to start) a live connection
    Connection,
    /// Failed to decode or handle a webcast message
    Message,
    /// The operation observed a cancellation request
    Cancelled,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Downcasts the source to `E`.
    ///
    /// Errors that were published on the exception channel are returned to the caller wrapped
    /// around the shared [`Arc<Error>`]; this looks through that wrapper.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        if let Some(shared) = e.downcast_ref::<Arc<Error>>() {
            return shared.downcast_ref::<E>();
        }
        e.downcast_ref::<E>()
    }

    /// Returns `true` if this error (or the error it shares) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == Kind::Cancelled
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn status<S: Into<String>>(
        status_code: StatusCode,
        method: Method,
        path: String,
        message: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            message: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Cancelled.into()
    }

    /// Wraps an error that has been shared with exception channel subscribers, keeping its
    /// [`Kind`] so callers can still classify it.
    #[must_use]
    pub fn shared(error: Arc<Error>) -> Self {
        Error::with_source(error.kind(), error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => match src.downcast_ref::<Arc<Error>>() {
                Some(shared) => fmt::Display::fmt(shared.as_ref(), f),
                None => write!(f, "{:?}: {}", self.kind, src),
            },
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Status {
    pub status_code: StatusCode,
    pub method: Method,
    pub path: String,
    pub message: String,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error({}) making {} call to {} with {}",
            self.status_code, self.method, self.path, self.message
        )
    }
}

impl StdError for Status {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl StdError for Cancelled {}

/// What a [`Fetch`] error was trying to retrieve.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum FetchTarget {
    #[strum(to_string = "room id")]
    RoomId,
    #[strum(to_string = "room info")]
    RoomInfo,
    #[strum(to_string = "gift catalog")]
    Gifts,
}

/// Best guess at why the live page did not carry a room id.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    /// The page rendered normally, the host is probably not live
    LikelyOffline,
    /// The page did not render, the caller is probably blocked or rate limited
    LikelyBlocked,
}

impl fmt::Display for PageVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LikelyOffline => write!(f, "host might be offline"),
            Self::LikelyBlocked => write!(f, "your IP or country might be blocked"),
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Fetch {
    pub target: FetchTarget,
    pub verdict: Option<PageVerdict>,
    pub cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Fetch {
    pub(crate) fn caused_by<E: StdError + Send + Sync + 'static>(
        target: FetchTarget,
        cause: E,
    ) -> Self {
        Self {
            target,
            verdict: None,
            cause: Some(Box::new(cause)),
        }
    }

    pub(crate) fn unresolved(verdict: PageVerdict) -> Self {
        Self {
            target: FetchTarget::RoomId,
            verdict: Some(verdict),
            cause: None,
        }
    }
}

impl fmt::Display for Fetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to fetch {}", self.target)?;
        if let Some(verdict) = self.verdict {
            write!(f, ": {verdict}")?;
        }
        Ok(())
    }
}

impl StdError for Fetch {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Reasons a connection attempt could not be completed.
#[non_exhaustive]
#[derive(Debug)]
pub enum ConnectionError {
    /// A connection attempt is already in progress
    AlreadyConnecting,
    /// The client already holds a live connection
    AlreadyConnected,
    /// The room exists but is not broadcasting
    LiveNotFound { reason: String },
    /// The signing service did not return an initial response for the room
    SignFailure { room_id: String, host: String },
    /// The push server socket could not be opened
    SocketOpen(Box<Error>),
}

impl ConnectionError {
    /// Only socket-open failures are worth retrying; everything else needs caller action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::SocketOpen(_))
    }

    /// Failures that are reported on the exception channel and then swallowed.
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        matches!(self, Self::AlreadyConnecting | Self::AlreadyConnected)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConnecting => write!(f, "already connecting"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::LiveNotFound { reason } => write!(f, "live not found: {reason}"),
            Self::SignFailure { room_id, host } => {
                write!(f, "failed signing connection to room {room_id} of host {host}")
            }
            Self::SocketOpen(e) => write!(f, "failed to connect to the websocket: {e}"),
        }
    }
}

impl StdError for ConnectionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::SocketOpen(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Failures while turning a push frame into something the handler accepted.
#[non_exhaustive]
#[derive(Debug)]
pub enum MessageError {
    /// The frame or its payload was not valid protobuf
    Decode(prost::DecodeError),
    /// The handler rejected the initial response delivered with the signed endpoint
    InitialMessages(Box<Error>),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "failed to decode webcast frame: {e}"),
            Self::InitialMessages(e) => write!(f, "error handling initial messages: {e}"),
        }
    }
}

impl StdError for MessageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::InitialMessages(e) => Some(e.as_ref()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        MessageError::Decode(e).into()
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Error::with_source(Kind::Status, err)
    }
}

impl From<Cancelled> for Error {
    fn from(err: Cancelled) -> Self {
        Error::with_source(Kind::Cancelled, err)
    }
}

impl From<Fetch> for Error {
    fn from(err: Fetch) -> Self {
        Error::with_source(Kind::Fetch, err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::with_source(Kind::Connection, err)
    }
}

impl From<MessageError> for Error {
    fn from(err: MessageError) -> Self {
        Error::with_source(Kind::Message, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_display_should_include_verdict() {
        let offline = Fetch::unresolved(PageVerdict::LikelyOffline);
        assert_eq!(
            offline.to_string(),
            "failed to fetch room id: host might be offline"
        );

        let blocked: Error = Fetch::unresolved(PageVerdict::LikelyBlocked).into();
        assert_eq!(blocked.kind(), Kind::Fetch);
        assert!(blocked.to_string().contains("blocked"), "{blocked}");
    }

    #[test]
    fn shared_error_should_downcast_through_arc() {
        let original: Error = ConnectionError::LiveNotFound {
            reason: "status 4".to_owned(),
        }
        .into();
        let shared = Error::shared(Arc::new(original));

        assert_eq!(shared.kind(), Kind::Connection);
        assert!(
            matches!(
                shared.downcast_ref::<ConnectionError>(),
                Some(ConnectionError::LiveNotFound { .. })
            ),
            "shared error should expose the connection error"
        );
    }

    #[test]
    fn shared_error_should_display_like_the_original() {
        let original: Error = ConnectionError::LiveNotFound {
            reason: "status 4".to_owned(),
        }
        .into();
        let expected = original.to_string();
        let shared = Error::shared(Arc::new(original));

        assert_eq!(shared.to_string(), expected);
        assert!(expected.starts_with("Connection: "), "{expected}");
    }

    #[test]
    fn only_socket_open_is_retryable() {
        let open = ConnectionError::SocketOpen(Box::new(Error::validation("refused")));
        assert!(open.is_retryable(), "socket open should be retryable");
        assert!(!ConnectionError::AlreadyConnected.is_retryable(), "quiet errors never retry");
        assert!(ConnectionError::AlreadyConnecting.is_quiet(), "already connecting is quiet");
        assert!(
            !ConnectionError::SignFailure {
                room_id: "1".to_owned(),
                host: "h".to_owned()
            }
            .is_quiet(),
            "sign failures propagate"
        );
    }
}
