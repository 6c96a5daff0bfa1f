//! Query parameter set shared by every webcast request and the push socket URL.
//!
//! Values are layered in a fixed order: built-in defaults, then the language from
//! [`Settings`], then caller overrides, then values injected by the protocol (room id, cursor,
//! content type, internal extension and route parameters). Later layers always win.

use std::collections::BTreeMap;

use phf::phf_map;
use serde::Serialize;

use crate::config::Settings;
use crate::ws::types::Response;

pub const ROOM_ID: &str = "room_id";
pub const CURSOR: &str = "cursor";
pub const INTERNAL_EXT: &str = "internal_ext";
pub const RESP_CONTENT_TYPE: &str = "resp_content_type";

static DEFAULT_PARAMS: phf::Map<&'static str, &'static str> = phf_map! {
    "aid" => "1988",
    "app_language" => "en-US",
    "app_name" => "tiktok_web",
    "browser_language" => "en",
    "browser_name" => "Mozilla",
    "browser_online" => "true",
    "browser_platform" => "Win32",
    "browser_version" => "5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "cookie_enabled" => "true",
    "cursor" => "",
    "internal_ext" => "",
    "device_platform" => "web",
    "focus_state" => "true",
    "from_page" => "user",
    "history_len" => "4",
    "is_fullscreen" => "false",
    "is_page_visible" => "true",
    "did_rule" => "3",
    "fetch_rule" => "1",
    "last_rtt" => "0",
    "live_id" => "12",
    "resp_content_type" => "protobuf",
    "screen_height" => "1152",
    "screen_width" => "2048",
    "tz_name" => "Europe/Berlin",
    "referer" => "https://www.tiktok.com/",
    "root_referer" => "https://www.tiktok.com/",
    "webcast_language" => "en-US",
    "webcast_sdk_version" => "1.3.0",
    "update_version_code" => "1.3.0",
};

/// Ordered key/value set serialized into request query strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    /// Builds the set from the defaults, the configured language and the caller overrides.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut params: BTreeMap<String, String> = DEFAULT_PARAMS
            .entries()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();

        for key in ["app_language", "webcast_language"] {
            params.insert(key.to_owned(), settings.client_language.clone());
        }
        params.extend(settings.params.clone());

        Self(params)
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Injects the protocol values carried by the signed endpoint's initial response.
    pub fn apply_response(&mut self, room_id: &str, response: &Response) {
        self.insert(ROOM_ID, room_id);
        self.insert(CURSOR, response.cursor.as_str());
        self.insert(RESP_CONTENT_TYPE, "protobuf");
        self.insert(INTERNAL_EXT, response.internal_ext.as_str());
        self.0.extend(response.route_params_map.clone());
    }

    /// URL-encoded `key=value&...` without a leading `?`.
    #[must_use]
    pub fn query_string(&self) -> String {
        serde_html_form::to_string(self)
            .inspect_err(|e| tracing::error!("Unable to convert to URL-encoded string {e:?}"))
            .unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn language_overrides_defaults() {
        let settings = Settings::builder().client_language("fr-FR").build();
        let params = QueryParams::from_settings(&settings);

        assert_eq!(params.get("app_language"), Some("fr-FR"));
        assert_eq!(params.get("webcast_language"), Some("fr-FR"));
        assert_eq!(params.get("aid"), Some("1988"));
    }

    #[test]
    fn caller_overrides_beat_language() {
        let settings = Settings::builder()
            .client_language("fr-FR")
            .params(BTreeMap::from([
                ("app_language".to_owned(), "ja-JP".to_owned()),
                ("cursor".to_owned(), "caller".to_owned()),
            ]))
            .build();
        let params = QueryParams::from_settings(&settings);

        assert_eq!(params.get("app_language"), Some("ja-JP"));
        assert_eq!(params.get("webcast_language"), Some("fr-FR"));
        assert_eq!(params.get("cursor"), Some("caller"));
    }

    #[test]
    fn protocol_values_win_every_collision() {
        let settings = Settings::builder()
            .params(BTreeMap::from([
                ("cursor".to_owned(), "caller".to_owned()),
                ("room_id".to_owned(), "1".to_owned()),
                ("resp_content_type".to_owned(), "json".to_owned()),
                ("region".to_owned(), "caller".to_owned()),
            ]))
            .build();
        let mut params = QueryParams::from_settings(&settings);

        let response = Response {
            cursor: "c-42".to_owned(),
            internal_ext: "ext".to_owned(),
            route_params_map: BTreeMap::from([("region".to_owned(), "eu".to_owned())]),
            ..Response::default()
        };
        params.apply_response("7000", &response);

        assert_eq!(params.get("room_id"), Some("7000"));
        assert_eq!(params.get("cursor"), Some("c-42"));
        assert_eq!(params.get("resp_content_type"), Some("protobuf"));
        assert_eq!(params.get("internal_ext"), Some("ext"));
        assert_eq!(params.get("region"), Some("eu"));
    }

    #[test]
    fn query_string_is_url_encoded() {
        let params: QueryParams = [("a", "1 2"), ("b", "x&y")].into_iter().collect();
        assert_eq!(params.query_string(), "a=1+2&b=x%26y");
    }
}
