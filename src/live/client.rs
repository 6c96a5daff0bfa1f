use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use backoff::backoff::{Backoff as _, Constant};
use bon::bon;
use dashmap::DashMap;
use reqwest::header::{COOKIE, USER_AGENT};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::state::ConnectionState;
use crate::Result;
use crate::config::{Settings, log_at};
use crate::error::{ConnectionError, Error, Kind, MessageError};
use crate::exception::Exceptions;
use crate::webcast;
use crate::webcast::client::DEFAULT_USER_AGENT;
use crate::webcast::params::{CURSOR, QueryParams, ROOM_ID};
use crate::webcast::types::response::{Gift, RoomInfo, SignedEndpoint};
use crate::ws::types::version_code;
use crate::ws::{
    Connection, Connector, MessageHandler, SocketHandle, SocketTarget, TungsteniteConnector,
};

/// Connection controller for one host's live room.
///
/// Cloning is cheap and every clone drives the same session. Dropping the last clone cancels a
/// running session, which closes the socket and ends both loops.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    host: String,
    /// Room id handed to the builder, reused by every connect
    supplied_room_id: Option<String>,
    settings: Arc<Settings>,
    webcast: webcast::Client,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn MessageHandler>,
    exceptions: Exceptions,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    /// Gift catalog keyed by gift id. Entries survive disconnects and are only overwritten.
    gifts: DashMap<i64, Gift>,
}

/// Everything that lives exactly as long as one connection.
struct Session {
    room_id: Option<String>,
    room_info: Option<RoomInfo>,
    params: QueryParams,
    endpoint: Option<SignedEndpoint>,
    handle: Option<Arc<SocketHandle>>,
    loops: Option<Loops>,
    token: DroppingCancellationToken,
}

/// Cancels the session when the owning [`ClientInner`] is dropped.
#[derive(Debug, Default)]
struct DroppingCancellationToken(Option<CancellationToken>);

impl DroppingCancellationToken {
    fn get(&self) -> Option<CancellationToken> {
        self.0.clone()
    }
}

impl Drop for DroppingCancellationToken {
    fn drop(&mut self) {
        if let Some(token) = self.0.take() {
            token.cancel();
        }
    }
}

struct Loops {
    receive: JoinHandle<Result<()>>,
    keep_alive: JoinHandle<Result<()>>,
}

impl Loops {
    /// Waits for both loops, returning the first failure. Failures were already published on
    /// the exception channel by the loops themselves.
    async fn join(self) -> Result<()> {
        let receive = self.receive.await;
        let keep_alive = self.keep_alive.await;

        receive.map_err(|e| Error::with_source(Kind::Internal, e))??;
        keep_alive.map_err(|e| Error::with_source(Kind::Internal, e))??;
        Ok(())
    }
}

async fn cancellable<T>(
    token: &CancellationToken,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::cancelled()),
        result = step => result,
    }
}

#[bon]
impl Client {
    /// Either `host` or `room_id` must be given. A supplied `room_id` skips the live page scrape
    /// on every connect.
    #[builder]
    pub fn new(
        #[builder(into, default)] host: String,
        #[builder(into)] room_id: Option<String>,
        #[builder(default)] settings: Settings,
        handler: Arc<dyn MessageHandler>,
        /// Socket transport, tokio-tungstenite unless overridden
        connector: Option<Arc<dyn Connector>>,
    ) -> Result<Self> {
        let room_id = room_id.filter(|id| !id.is_empty());
        if host.is_empty() && room_id.is_none() {
            return Err(Error::validation("either a host or a room id is required"));
        }

        let settings = settings.normalize();
        let webcast = webcast::Client::new(&settings)?;
        let params = QueryParams::from_settings(&settings);

        Ok(Self {
            inner: Arc::new(ClientInner {
                host,
                supplied_room_id: room_id,
                settings: Arc::new(settings),
                webcast,
                connector: connector.unwrap_or_else(|| Arc::new(TungsteniteConnector)),
                handler,
                exceptions: Exceptions::default(),
                state: watch::Sender::new(ConnectionState::Idle),
                session: Mutex::new(Session {
                    room_id: None,
                    room_info: None,
                    params,
                    endpoint: None,
                    handle: None,
                    loops: None,
                    token: DroppingCancellationToken::default(),
                }),
                gifts: DashMap::new(),
            }),
        })
    }
}

impl Client {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// The HTTP client used for session setup, configured from the same [`Settings`].
    #[must_use]
    pub fn webcast(&self) -> &webcast::Client {
        &self.inner.webcast
    }

    /// Subscribes to the exception channel. Each receiver sees every later event.
    #[must_use]
    pub fn exceptions(&self) -> broadcast::Receiver<Arc<Error>> {
        self.inner.exceptions.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every [`ConnectionState`] change.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn connecting(&self) -> bool {
        self.state().is_connecting()
    }

    /// `true` iff the push socket currently reports itself open.
    pub async fn connected(&self) -> bool {
        let handle = self.session().handle.clone();
        match handle {
            Some(handle) => handle.is_connected().await,
            None => false,
        }
    }

    /// Room id of the current session.
    #[must_use]
    pub fn room_id(&self) -> Option<String> {
        self.session().room_id.clone()
    }

    #[must_use]
    pub fn room_info(&self) -> Option<RoomInfo> {
        self.session().room_info.clone()
    }

    #[must_use]
    pub fn viewer_count(&self) -> Option<u64> {
        self.session()
            .room_info
            .as_ref()
            .and_then(RoomInfo::viewer_count)
    }

    /// The full gift catalog, ordered by id.
    #[must_use]
    pub fn available_gifts(&self) -> Vec<Gift> {
        let mut gifts: Vec<Gift> = self
            .inner
            .gifts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        gifts.sort_by_key(|gift| gift.id);
        gifts
    }

    /// Gifts shown on the room's gift panel, ordered by id.
    #[must_use]
    pub fn displayed_gifts(&self) -> Vec<Gift> {
        let mut gifts = self.available_gifts();
        gifts.retain(|gift| gift.is_displayed_on_panel);
        gifts
    }

    #[must_use]
    pub fn gift(&self, id: i64) -> Option<Gift> {
        self.inner.gifts.get(&id).map(|gift| gift.value().clone())
    }

    /// Connects, retrying socket-open failures every reconnect interval when `retry` is set.
    ///
    /// Returns the room id, or `None` when the attempt was cancelled through `token` or refused
    /// because a session is already connecting or connected. Every other failure is published
    /// on the exception channel and returned.
    pub async fn start(&self, token: &CancellationToken, retry: bool) -> Result<Option<String>> {
        let settings = &self.inner.settings;
        let mut backoff = Constant::new(settings.reconnect_interval);
        let mut attempts = 0_u32;

        loop {
            attempts = attempts.saturating_add(1);
            log_at!(settings, Information, attempt = attempts, "starting connection");

            let error = match self.connect(token).await {
                Ok(room_id) => return Ok(Some(room_id)),
                Err(e) => e,
            };

            if error.is_cancelled() {
                log_at!(settings, Warning, "connect cancelled by user");
                return Ok(None);
            }
            log_at!(settings, Error, error = %error, "failed to connect");

            let connection = error.downcast_ref::<ConnectionError>();
            let quiet = connection.is_some_and(ConnectionError::is_quiet);
            let retryable = connection.is_some_and(ConnectionError::is_retryable);

            if quiet {
                self.inner.exceptions.report(error);
                return Ok(None);
            }

            let attempts_left = settings.max_connect_attempts.is_none_or(|max| attempts < max);
            if retry && retryable && attempts_left {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or(settings.reconnect_interval);
                log_at!(settings, Information, ?delay, "retrying connection");
                tokio::select! {
                    () = token.cancelled() => return Ok(None),
                    () = sleep(delay) => continue,
                }
            }

            return Err(Error::shared(self.inner.exceptions.report(error)));
        }
    }

    /// [`Client::start`], then waits until both loops have ended.
    pub async fn run(&self, token: &CancellationToken, retry: bool) -> Result<Option<String>> {
        let Some(room_id) = self.start(token, retry).await? else {
            return Ok(None);
        };

        let loops = self.session().loops.take();
        match loops {
            Some(loops) => loops.join().await?,
            None => self.wait_until_idle().await,
        }
        Ok(Some(room_id))
    }

    /// Disconnects and waits for both loops to end. Does nothing when idle.
    pub async fn stop(&self) {
        if self.state().is_idle() {
            return;
        }
        log_at!(self.inner.settings, Information, "stopping connection");

        let (token, handle, loops) = {
            let mut session = self.session();
            (
                session.token.get(),
                session.handle.clone(),
                session.loops.take(),
            )
        };

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(handle) = handle {
            handle.close().await;
        }
        match loops {
            // Failures were reported by the loops themselves
            Some(loops) => {
                _ = loops.join().await;
            }
            None => self.wait_until_idle().await,
        }
    }

    async fn wait_until_idle(&self) {
        let mut state = self.inner.state.subscribe();
        _ = state.wait_for(|state| state.is_idle()).await;
    }

    /// Claims the state machine for a new connection attempt and stores the session token.
    ///
    /// The token is stored under the session lock before the state leaves `Idle`, so a
    /// concurrent [`Client::stop`] always finds it.
    fn claim(&self, token: &CancellationToken) -> Result<CancellationToken> {
        let next = if self.inner.supplied_room_id.is_some() {
            ConnectionState::Initializing
        } else {
            ConnectionState::Resolving
        };

        let mut session = self.session();
        let mut refused = None;
        self.inner.state.send_if_modified(|state| match *state {
            ConnectionState::Idle => {
                *state = next;
                true
            }
            ConnectionState::Resolving | ConnectionState::Initializing => {
                refused = Some(ConnectionError::AlreadyConnecting);
                false
            }
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                refused = Some(ConnectionError::AlreadyConnected);
                false
            }
        });

        if let Some(reason) = refused {
            return Err(reason.into());
        }
        let session_token = token.child_token();
        session.token = DroppingCancellationToken(Some(session_token.clone()));
        Ok(session_token)
    }

    async fn connect(&self, token: &CancellationToken) -> Result<String> {
        let session_token = self.claim(token)?;

        let result = self.establish(&session_token).await;
        if result.is_err() && self.state() != ConnectionState::Connected {
            self.inner.finish_session();
        }
        result
    }

    fn params(&self) -> QueryParams {
        self.session().params.clone()
    }

    async fn establish(&self, token: &CancellationToken) -> Result<String> {
        let inner = &self.inner;
        let settings = &inner.settings;

        let room_id = if let Some(room_id) = &inner.supplied_room_id {
            log_at!(settings, Verbose, room_id, "using provided room id");
            room_id.clone()
        } else {
            log_at!(settings, Verbose, host = %inner.host, "fetching room id");
            let params = self.params();
            let room_id =
                cancellable(token, inner.webcast.resolve_room_id(&inner.host, &params)).await?;
            log_at!(settings, Verbose, host = %inner.host, room_id, "found room id");
            room_id
        };
        {
            let mut session = self.session();
            session.params.insert(ROOM_ID, room_id.as_str());
            session.room_id = Some(room_id.clone());
        }
        inner.state.send_replace(ConnectionState::Initializing);

        if !settings.skip_room_info {
            log_at!(settings, Verbose, "fetching room info");
            let info = cancellable(token, inner.webcast.room_info(&self.params())).await?;
            if info.is_ended() {
                return Err(ConnectionError::LiveNotFound {
                    reason: "live stream for host could not be found, is the host online?"
                        .to_owned(),
                }
                .into());
            }
            self.session().room_info = Some(info);
        }

        if settings.download_gift_info {
            log_at!(settings, Verbose, "fetching gift info");
            match cancellable(token, inner.webcast.gifts(&self.params())).await {
                Ok(gifts) => {
                    for gift in gifts {
                        inner.gifts.insert(gift.id, gift);
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    log_at!(settings, Error, error = %e, "failed to fetch gifts, continuing");
                    inner.exceptions.report(e);
                }
            }
        }

        log_at!(settings, Verbose, "signing connection");
        let endpoint = cancellable(token, inner.webcast.sign(&room_id))
            .await
            .inspect_err(|e| {
                if !e.is_cancelled() {
                    log_at!(settings, Error, error = %e, "signing service failed to sign the socket url");
                }
            })?;
        let Some(initial) = endpoint.initial_response.clone() else {
            return Err(ConnectionError::SignFailure {
                room_id,
                host: inner.host.clone(),
            }
            .into());
        };
        let Some(push_server) = endpoint.push_server() else {
            return Err(ConnectionError::LiveNotFound {
                reason: "could not find room".to_owned(),
            }
            .into());
        };

        let url = {
            let mut session = self.session();
            session.params.apply_response(&room_id, &initial);
            format!(
                "{push_server}?version_code={}&{}",
                version_code(push_server),
                session.params.query_string()
            )
        };
        let url = Url::parse(&url)?;
        log_at!(settings, Verbose, %url, "creating socket");

        let mut headers = vec![(USER_AGENT.as_str().to_owned(), DEFAULT_USER_AGENT.to_owned())];
        let cookie = endpoint.cookie_header();
        if !cookie.is_empty() {
            headers.push((COOKIE.as_str().to_owned(), cookie));
        }
        let target = SocketTarget::new(url, headers, settings.socket_buffer_size);
        self.session().endpoint = Some(endpoint);

        let handle = cancellable(
            token,
            SocketHandle::open(Arc::clone(&inner.connector), target, settings.timeout),
        )
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                e
            } else {
                ConnectionError::SocketOpen(Box::new(e)).into()
            }
        })?;

        self.spawn_loops(Arc::new(handle), token);
        // The loops tear the session down themselves
        if token.is_cancelled() {
            return Err(Error::cancelled());
        }
        log_at!(settings, Information, room_id, "connected");

        if settings.handle_initial_messages {
            inner.handler.handle(&initial).map_err(|e| {
                log_at!(settings, Error, error = %e, "failed to handle the initial messages, the socket did connect");
                MessageError::InitialMessages(Box::new(e))
            })?;
        }

        Ok(room_id)
    }

    fn spawn_loops(&self, handle: Arc<SocketHandle>, token: &CancellationToken) {
        let inner = &self.inner;
        let connection = Connection::new(
            Arc::clone(&handle),
            Arc::clone(&inner.handler),
            Arc::clone(&inner.settings),
            inner.exceptions.clone(),
            token.clone(),
        );

        let receiver = connection.clone();
        let owner = Arc::downgrade(&self.inner);

        // The receive task may end before this returns; holding the session lock keeps its
        // teardown ordered after the session is marked connected.
        let mut session = self.session();
        let receive = tokio::spawn(async move {
            let result = receiver.receive_loop().await;
            if let Some(owner) = owner.upgrade() {
                owner.finish_session();
            }
            result
        });
        let keep_alive = tokio::spawn(async move { connection.keep_alive_loop().await });

        session.handle = Some(handle);
        session.loops = Some(Loops {
            receive,
            keep_alive,
        });
        inner.state.send_replace(ConnectionState::Connected);
        drop(session);
    }
}

impl ClientInner {
    /// Clears every per-session value and returns to `Idle`.
    fn finish_session(&self) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let state = *self.state.borrow();
        match state {
            ConnectionState::Idle => return,
            ConnectionState::Connected => {
                self.state.send_replace(ConnectionState::Disconnecting);
            }
            _ => {}
        }

        session.room_id = None;
        session.room_info = None;
        session.endpoint = None;
        session.handle = None;
        session.params.insert(CURSOR, "");
        if let Some(token) = session.token.0.take() {
            token.cancel();
        }
        drop(session);

        self.state.send_replace(ConnectionState::Idle);
        log_at!(self.settings, Information, "disconnected");
    }
}
