//! HTTP client for the website, the webcast JSON API and the signing service.
//!
//! # Example
//!
//! ```no_run
//! use webcast_client_sdk::config::Settings;
//! use webcast_client_sdk::webcast::Client;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(&Settings::default())?;
//!
//! if client.user_streaming("some_host").await? {
//!     let room_id = client.resolve_room_id("some_host", &Default::default()).await?;
//!     println!("live in room {room_id}");
//! }
//! # Ok(())
//! # }
//! ```

use prost::Message as _;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use reqwest::{Client as ReqwestClient, Method, Proxy, StatusCode};
use secrecy::{ExposeSecret as _, SecretString};
use serde::de::DeserializeOwned;
use url::Url;

use super::params::QueryParams;
use super::room;
use super::types::response::{
    Gift, GiftListResponse, RoomInfo, SignedEndpoint, parse_cookies,
};
use crate::config::Settings;
use crate::error::{Error, Fetch, FetchTarget};
use crate::Result;
use crate::ws::types::Response;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Response header through which the signing service hands over the socket cookies.
pub const SIGNED_COOKIE_HEADER: &str = "x-set-tt-cookie";

const ROOM_INFO_PATH: &str = "room/info/";
const GIFT_LIST_PATH: &str = "gift/list/";

fn with_query(url: &mut Url, params: &QueryParams) {
    let query = params.query_string();
    if !query.is_empty() {
        url.set_query(Some(&query));
    }
}

/// HTTP client used during session setup.
///
/// Timeout, compression, proxy and language come from [`Settings`]; hosts default to the
/// public endpoints and can be overridden in [`Settings`] for testing.
#[derive(Clone, Debug)]
pub struct Client {
    web_host: Url,
    webcast_host: Url,
    signing_url: Url,
    signing_key: Option<SecretString>,
    client: ReqwestClient,
}

impl Client {
    pub fn new(settings: &Settings) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(REFERER, HeaderValue::from_static("https://www.tiktok.com/"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&settings.client_language)
                .map_err(|e| Error::validation(format!("invalid client language: {e}")))?,
        );

        let mut builder = ReqwestClient::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .gzip(settings.enable_compression);
        if let Some(proxy) = &settings.proxy {
            builder = builder.proxy(Proxy::all(proxy)?);
        }

        Ok(Self {
            web_host: Url::parse(&settings.web_host)?,
            webcast_host: Url::parse(&settings.webcast_host)?,
            signing_url: Url::parse(&settings.signing_server_url)?,
            signing_key: settings.signing_key.clone(),
            client: builder.build()?,
        })
    }

    async fn get_text(&self, url: Url) -> Result<String> {
        let request = self.client.request(Method::GET, url).build()?;
        let path = request.url().path().to_owned();
        let response = self.client.execute(request).await?;
        let status_code = response.status();

        if !status_code.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::status(status_code, Method::GET, path, message));
        }

        Ok(response.text().await?)
    }

    async fn get_json<Res: DeserializeOwned>(
        &self,
        path: &str,
        params: &QueryParams,
    ) -> Result<Res> {
        let mut url = self.webcast_host.join(path)?;
        with_query(&mut url, params);
        let request = self.client.request(Method::GET, url).build()?;
        crate::request(&self.client, request).await
    }

    fn host_url(&self, host: &str, live: bool) -> Result<Url> {
        let suffix = if live { "/live" } else { "" };
        Ok(self.web_host.join(&format!("@{host}{suffix}"))?)
    }

    /// Fetches the HTML of the host's live page.
    pub async fn live_page(&self, host: &str, params: &QueryParams) -> Result<String> {
        let mut url = self.host_url(host, true)?;
        with_query(&mut url, params);
        self.get_text(url).await
    }

    /// Fetches the HTML of the host's profile page.
    pub async fn profile_page(&self, host: &str) -> Result<String> {
        self.get_text(self.host_url(host, false)?).await
    }

    /// Scrapes the live page for the room id, see [`room::resolve`].
    pub async fn resolve_room_id(&self, host: &str, params: &QueryParams) -> Result<String> {
        room::resolve(|| async {
            self.live_page(host, params)
                .await
                .map_err(|e| Fetch::caused_by(FetchTarget::RoomId, e).into())
        })
        .await
    }

    /// Room metadata, used to detect whether the broadcast has ended.
    pub async fn room_info(&self, params: &QueryParams) -> Result<RoomInfo> {
        self.get_json(ROOM_INFO_PATH, params)
            .await
            .map_err(|e| Fetch::caused_by(FetchTarget::RoomInfo, e).into())
    }

    /// The room's gift catalog. A response without gift data yields an empty list.
    pub async fn gifts(&self, params: &QueryParams) -> Result<Vec<Gift>> {
        let response: GiftListResponse = self
            .get_json(GIFT_LIST_PATH, params)
            .await
            .map_err(|e| Error::from(Fetch::caused_by(FetchTarget::Gifts, e)))?;

        Ok(response.data.map(|data| data.gifts).unwrap_or_default())
    }

    /// Asks the signing service for the push server bundle of `room_id`.
    ///
    /// Transport and status failures are errors. A body that is empty or not a valid
    /// [`Response`] yields a bundle without initial response, which callers treat as a signing
    /// failure.
    pub async fn sign(&self, room_id: &str) -> Result<SignedEndpoint> {
        let mut url = self.signing_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("client", env!("CARGO_PKG_NAME"));
            pairs.append_pair("room_id", room_id);
            if let Some(key) = &self.signing_key {
                pairs.append_pair("apiKey", key.expose_secret());
            }
        }

        let request = self.client.request(Method::GET, url).build()?;
        let path = request.url().path().to_owned();
        let response = self.client.execute(request).await?;
        let status_code = response.status();

        if !status_code.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status_code, path = %path, "signing request failed");
            return Err(Error::status(status_code, Method::GET, path, message));
        }

        let cookies = response
            .headers()
            .get(SIGNED_COOKIE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(parse_cookies)
            .unwrap_or_default();
        let body = response.bytes().await?;

        let initial_response = if body.is_empty() {
            None
        } else {
            Response::decode(body.as_ref())
                .inspect_err(|e| {
                    tracing::warn!(error = %e, "signing service returned an undecodable response");
                })
                .ok()
        };

        Ok(SignedEndpoint::new(
            room_id.to_owned(),
            cookies,
            initial_response,
        ))
    }

    /// `true` if the host has a profile page. A 404 means the user does not exist.
    pub async fn user_exists(&self, host: &str) -> Result<bool> {
        match self.profile_page(host).await {
            Ok(_) => Ok(true),
            Err(e) => match e.downcast_ref::<crate::error::Status>() {
                Some(status) if status.status_code == StatusCode::NOT_FOUND => Ok(false),
                _ => Err(e),
            },
        }
    }

    /// `true` if the host's live page currently exposes a room id.
    pub async fn user_streaming(&self, host: &str) -> Result<bool> {
        let html = self.live_page(host, &QueryParams::default()).await?;
        Ok(room::extract_room_id(&html).is_some())
    }
}
