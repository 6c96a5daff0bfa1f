use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::serde_helpers::StringFromAny;
use crate::ws::types::Response;

/// Room status reported once a broadcast is over.
pub const ROOM_STATUS_ENDED: i64 = 4;

/// Response of `room/info/`.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize, Builder)]
pub struct RoomInfo {
    #[serde(default)]
    pub status_code: Option<i64>,
    #[serde(default)]
    pub data: Option<RoomData>,
}

#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, Builder)]
pub struct RoomData {
    #[serde_as(as = "Option<StringFromAny>")]
    #[serde(default)]
    pub id_str: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub user_count: Option<u64>,
    #[serde(default)]
    pub owner: Option<RoomOwner>,
}

#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, Builder)]
pub struct RoomOwner {
    #[serde_as(as = "Option<StringFromAny>")]
    #[serde(default)]
    pub id_str: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub display_id: Option<String>,
}

impl RoomInfo {
    /// `true` when the room carries no status or reports the broadcast as ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|data| data.status)
            .is_none_or(|status| status == ROOM_STATUS_ENDED)
    }

    #[must_use]
    pub fn viewer_count(&self) -> Option<u64> {
        self.data.as_ref().and_then(|data| data.user_count)
    }
}

/// Response of `gift/list/`.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GiftListResponse {
    #[serde(default)]
    pub data: Option<GiftListData>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GiftListData {
    #[serde(default)]
    pub gifts: Vec<Gift>,
}

/// A gift that viewers can send in a room.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct Gift {
    pub id: i64,
    #[serde(default)]
    #[builder(into, default)]
    pub name: String,
    #[serde(default)]
    #[builder(into, default)]
    pub describe: String,
    #[serde(default)]
    #[builder(default)]
    pub diamond_count: u32,
    #[serde(default, rename = "type")]
    #[builder(default)]
    pub kind: i32,
    #[serde(default)]
    #[builder(default)]
    pub combo: bool,
    #[serde(default)]
    #[builder(default)]
    pub is_displayed_on_panel: bool,
    #[serde(default)]
    pub image: Option<GiftImage>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GiftImage {
    #[serde(default)]
    pub url_list: Vec<String>,
}

/// Everything needed to open (and later reopen) the push socket for a room, as returned by the
/// signing service.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignedEndpoint {
    pub room_id: String,
    /// Cookies the socket must present, in the order the signing service returned them
    pub cookies: Vec<(String, String)>,
    /// `None` when the signing service failed to produce a response for the room
    pub initial_response: Option<Response>,
}

impl SignedEndpoint {
    #[must_use]
    pub fn new(
        room_id: String,
        cookies: Vec<(String, String)>,
        initial_response: Option<Response>,
    ) -> Self {
        Self {
            room_id,
            cookies,
            initial_response,
        }
    }

    #[must_use]
    pub fn push_server(&self) -> Option<&str> {
        self.initial_response
            .as_ref()
            .map(|response| response.push_server.as_str())
            .filter(|server| !server.is_empty())
    }

    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.initial_response
            .as_ref()
            .map(|response| response.cursor.as_str())
    }

    #[must_use]
    pub fn internal_ext(&self) -> Option<&str> {
        self.initial_response
            .as_ref()
            .map(|response| response.internal_ext.as_str())
    }

    /// `Cookie` header value in `key=value;` form.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v};"))
            .collect()
    }
}

/// Splits a `k1=v1; k2=v2` header into pairs, skipping malformed entries.
pub(crate) fn parse_cookies(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (!key.is_empty()).then(|| (key.to_owned(), value.to_owned()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_status_counts_as_ended() {
        let info: RoomInfo = serde_json::from_value(json!({ "data": {} })).unwrap();
        assert!(info.is_ended(), "absent status must be treated as ended");

        let info: RoomInfo = serde_json::from_value(json!({})).unwrap();
        assert!(info.is_ended(), "absent data must be treated as ended");
    }

    #[test]
    fn status_four_is_ended() {
        let info: RoomInfo =
            serde_json::from_value(json!({ "data": { "status": 4, "user_count": 12 } })).unwrap();
        assert!(info.is_ended(), "status 4 is the ended sentinel");

        let live: RoomInfo =
            serde_json::from_value(json!({ "data": { "status": 2, "user_count": 12 } })).unwrap();
        assert!(!live.is_ended(), "status 2 is live");
        assert_eq!(live.viewer_count(), Some(12));
    }

    #[test]
    fn room_ids_accept_numbers_and_strings() {
        let info: RoomInfo = serde_json::from_value(json!({
            "data": { "id_str": 7_300_000_000_000_000_u64, "owner": { "id_str": "42", "nickname": "n" } }
        }))
        .unwrap();
        let data = info.data.unwrap();
        assert_eq!(data.id_str.as_deref(), Some("7300000000000000"));
        assert_eq!(data.owner.unwrap().id_str.as_deref(), Some("42"));
    }

    #[test]
    fn gift_deserializes_with_defaults() {
        let gift: Gift = serde_json::from_value(json!({
            "id": 5655,
            "name": "Rose",
            "diamond_count": 1,
            "type": 1,
            "is_displayed_on_panel": true,
            "image": { "url_list": ["https://example.com/rose.webp"] },
            "unknown": "ignored"
        }))
        .unwrap();

        assert_eq!(gift.id, 5655);
        assert_eq!(gift.name, "Rose");
        assert_eq!(gift.kind, 1);
        assert!(gift.is_displayed_on_panel, "panel flag parsed");
        assert!(!gift.combo, "combo defaults to false");
    }

    #[test]
    fn cookies_round_trip_into_header() {
        let cookies = parse_cookies("ttwid=abc; msToken=x=y ;bad; =empty");
        assert_eq!(
            cookies,
            vec![
                ("ttwid".to_owned(), "abc".to_owned()),
                ("msToken".to_owned(), "x=y".to_owned()),
            ]
        );

        let endpoint = SignedEndpoint::new("1".to_owned(), cookies, None);
        assert_eq!(endpoint.cookie_header(), "ttwid=abc;msToken=x=y;");
        assert_eq!(endpoint.push_server(), None);
    }
}
