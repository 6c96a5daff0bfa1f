#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use httpmock::{Method::GET, Mock, MockServer};
use prost::Message as _;
use reqwest::StatusCode;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response as HandshakeResponse,
};
use webcast_client_sdk::config::Settings;
use webcast_client_sdk::ws::types::{self, PushFrame, Response};

pub const HOST: &str = "someone";
pub const ROOM_ID: &str = "7311111111111111111";
pub const COOKIES: &str = "ttwid=abc; msToken=def";

/// Settings pointing every HTTP endpoint at `server`, with the slow defaults shortened.
#[must_use]
pub fn settings(server: &MockServer) -> Settings {
    Settings::builder()
        .web_host(server.url("/"))
        .webcast_host(server.url("/webcast/"))
        .signing_server_url(server.url("/sign"))
        .polling_interval(Duration::from_millis(100))
        .reconnect_interval(Duration::from_millis(50))
        .timeout(Duration::from_secs(5))
        .build()
}

#[must_use]
pub fn live_page(room_id: &str) -> String {
    format!(
        r#"<html><head><meta property="og:url" content="https://www.tiktok.com/@{HOST}/live"></head>
<body><script id="SIGI_STATE">{{"LiveRoom":{{"liveRoomUserInfo":{{"user":{{"roomId":"{room_id}"}}}}}}}}</script></body></html>"#
    )
}

pub fn mock_live_page<'a>(server: &'a MockServer, room_id: &str) -> Mock<'a> {
    let body = live_page(room_id);
    server.mock(|when, then| {
        when.method(GET).path(format!("/@{HOST}/live"));
        then.status(StatusCode::OK).body(body);
    })
}

pub fn mock_room_info(server: &MockServer, status: i64) -> Mock<'_> {
    server.mock(|when, then| {
        when.method(GET)
            .path("/webcast/room/info/")
            .query_param("room_id", ROOM_ID);
        then.status(StatusCode::OK).json_body(json!({
            "status_code": 0,
            "data": {
                "id_str": ROOM_ID,
                "status": status,
                "title": "evening stream",
                "user_count": 321,
                "owner": { "id_str": "42", "nickname": "Someone", "display_id": HOST }
            }
        }));
    })
}

pub fn mock_gifts(server: &MockServer) -> Mock<'_> {
    server.mock(|when, then| {
        when.method(GET)
            .path("/webcast/gift/list/")
            .query_param("room_id", ROOM_ID);
        then.status(StatusCode::OK).json_body(json!({
            "data": {
                "gifts": [
                    { "id": 5655, "name": "Rose", "diamond_count": 1, "type": 1, "is_displayed_on_panel": true },
                    { "id": 5269, "name": "TikTok", "diamond_count": 1, "type": 1, "combo": true },
                    { "id": 11046, "name": "Galaxy", "diamond_count": 1000, "type": 2, "is_displayed_on_panel": true }
                ]
            }
        }));
    })
}

/// Initial response as the signing service returns it, pointing at `push_server`.
#[must_use]
pub fn initial_response(push_server: &str) -> Response {
    Response {
        cursor: "cursor-0".to_owned(),
        internal_ext: "internal-ext-0".to_owned(),
        push_server: push_server.to_owned(),
        route_params_map: [("im_path".to_owned(), "/webcast/im/fetch/".to_owned())].into(),
        messages: vec![types::Message {
            method: "WebcastRoomUserSeqMessage".to_owned(),
            payload: vec![1, 2, 3],
            msg_id: 1,
            msg_type: 0,
        }],
        ..Response::default()
    }
}

pub fn mock_sign<'a>(server: &'a MockServer, response: Option<&Response>) -> Mock<'a> {
    let body = response.map(Response::encode_to_vec).unwrap_or_default();
    server.mock(|when, then| {
        when.method(GET)
            .path("/sign")
            .query_param("client", "webcast-client-sdk")
            .query_param("room_id", ROOM_ID);
        then.status(StatusCode::OK)
            .header("x-set-tt-cookie", COOKIES)
            .body(body);
    })
}

/// Encoded push frame whose payload is a response with the given cursor.
#[must_use]
pub fn frame(seq_id: u64, cursor: &str, needs_ack: bool) -> Vec<u8> {
    let response = Response {
        cursor: cursor.to_owned(),
        needs_ack,
        messages: vec![types::Message {
            method: "WebcastChatMessage".to_owned(),
            payload: cursor.as_bytes().to_vec(),
            msg_id: i64::try_from(seq_id).unwrap(),
            msg_type: 0,
        }],
        ..Response::default()
    };
    PushFrame {
        seq_id,
        payload: response.encode_to_vec(),
    }
    .encode_to_vec()
}

/// What the server saw during one socket handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
}

/// Mock push server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Binary frames broadcast to every connected client
    frame_tx: broadcast::Sender<Vec<u8>>,
    /// Makes every open connection drop without a close handshake
    abort_tx: broadcast::Sender<()>,
    handshakes: mpsc::UnboundedReceiver<Handshake>,
    received: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MockWsServer {
    /// Start a mock push server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (frame_tx, _) = broadcast::channel::<Vec<u8>>(100);
        let (abort_tx, _) = broadcast::channel::<()>(4);
        let (handshake_tx, handshakes) = mpsc::unbounded_channel();
        let (received_tx, received) = mpsc::unbounded_channel();

        let frames = frame_tx.clone();
        let aborts = abort_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let handshake_tx = handshake_tx.clone();
                let record = move |request: &Request,
                                   response: HandshakeResponse|
                      -> Result<HandshakeResponse, ErrorResponse> {
                    let header = |name: &str| {
                        request
                            .headers()
                            .get(name)
                            .and_then(|value| value.to_str().ok())
                            .map(str::to_owned)
                    };
                    drop(handshake_tx.send(Handshake {
                        uri: request.uri().to_string(),
                        cookie: header("cookie"),
                        user_agent: header("user-agent"),
                    }));
                    Ok(response)
                };

                // Subscribe before the handshake completes so no frame sent afterwards is missed
                let mut frame_rx = frames.subscribe();
                let mut abort_rx = aborts.subscribe();
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, record).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Binary(data))) => {
                                        drop(received_tx.send(data.to_vec()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            frame = frame_rx.recv() => {
                                match frame {
                                    Ok(data) => {
                                        if write.send(Message::Binary(data.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                            // Dropping both halves resets the connection
                            _ = abort_rx.recv() => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            frame_tx,
            abort_tx,
            handshakes,
            received,
        }
    }

    #[must_use]
    pub fn push_server(&self) -> String {
        format!("ws://{}/webcast/im/push/v2/", self.addr)
    }

    /// Send a binary frame to all connected clients.
    pub fn send(&self, frame: Vec<u8>) {
        drop(self.frame_tx.send(frame));
    }

    /// Drop every open connection without a close handshake.
    pub fn abort_connections(&self) {
        drop(self.abort_tx.send(()));
    }

    /// The next completed handshake.
    pub async fn next_handshake(&mut self) -> Option<Handshake> {
        timeout(Duration::from_secs(5), self.handshakes.recv())
            .await
            .ok()
            .flatten()
    }

    /// The next binary message written by a client.
    pub async fn next_received(&mut self) -> Option<Vec<u8>> {
        timeout(Duration::from_secs(5), self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// The next binary message that is not a keep-alive ping.
    pub async fn next_non_ping(&mut self) -> Option<Vec<u8>> {
        loop {
            let data = self.next_received().await?;
            if data != types::PING {
                return Some(data);
            }
        }
    }
}
