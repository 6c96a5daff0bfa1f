//! Protobuf wire shapes exchanged over the push socket.
//!
//! Field numbers are part of the protocol and must not change.

use std::collections::BTreeMap;

use prost::Message as _;

/// Keep-alive payload written to the socket every polling interval.
pub const PING: [u8; 4] = [0x3A, 0x02, 0x68, 0x62];

/// Push servers whose host contains this marker expect the newer version code.
pub const US_EAST_MARKER: &str = "ws-useast1a";
pub const US_EAST_VERSION_CODE: &str = "270000";
pub const DEFAULT_VERSION_CODE: &str = "180800";

/// Outer envelope of every binary socket message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PushFrame {
    #[prost(uint64, tag = "1")]
    pub seq_id: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

/// Logical response decoded from a [`PushFrame`] payload, also returned by the signing service.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<Message>,
    #[prost(string, tag = "2")]
    pub cursor: String,
    #[prost(int64, tag = "3")]
    pub fetch_interval: i64,
    #[prost(int64, tag = "4")]
    pub now: i64,
    #[prost(string, tag = "5")]
    pub internal_ext: String,
    #[prost(btree_map = "string, string", tag = "7")]
    pub route_params_map: BTreeMap<String, String>,
    #[prost(int64, tag = "8")]
    pub heartbeat_duration: i64,
    #[prost(bool, tag = "9")]
    pub needs_ack: bool,
    #[prost(string, tag = "10")]
    pub push_server: String,
}

/// One application event inside a [`Response`]. The payload is opaque to the client.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(int64, tag = "3")]
    pub msg_id: i64,
    #[prost(int32, tag = "4")]
    pub msg_type: i32,
}

/// Acknowledgement of a frame whose response set `needs_ack`.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Ack {
    #[prost(uint64, tag = "1")]
    pub id: u64,
}

impl Ack {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

impl PushFrame {
    /// Decodes the payload, or returns `None` when the frame carries none.
    pub fn response(&self) -> Result<Option<Response>, prost::DecodeError> {
        if self.payload.is_empty() {
            return Ok(None);
        }
        Response::decode(self.payload.as_slice()).map(Some)
    }
}

/// Version code the push server expects, chosen from its host string.
#[must_use]
pub fn version_code(push_server: &str) -> &'static str {
    if push_server.contains(US_EAST_MARKER) {
        US_EAST_VERSION_CODE
    } else {
        DEFAULT_VERSION_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_is_a_heartbeat_frame() {
        // field 7, length-delimited, "hb"
        assert_eq!(PING, [7 << 3 | 2, 2, b'h', b'b']);
    }

    #[test]
    fn ack_encodes_sequence_id_as_field_one() {
        assert_eq!(Ack::new(300).encode_to_vec(), vec![0x08, 0xAC, 0x02]);
    }

    #[test]
    fn frame_without_payload_has_no_response() {
        let frame = PushFrame {
            seq_id: 1,
            payload: Vec::new(),
        };
        assert_eq!(frame.response().unwrap(), None);
    }

    #[test]
    fn frame_payload_decodes_into_response() {
        let response = Response {
            cursor: "cursor-1".to_owned(),
            needs_ack: true,
            messages: vec![Message {
                method: "WebcastChatMessage".to_owned(),
                payload: vec![1, 2, 3],
                msg_id: 9,
                msg_type: 0,
            }],
            ..Response::default()
        };
        let frame = PushFrame {
            seq_id: 5,
            payload: response.encode_to_vec(),
        };
        let bytes = frame.encode_to_vec();

        let decoded = PushFrame::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.seq_id, 5);
        assert_eq!(decoded.response().unwrap(), Some(response));
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        let frame = PushFrame {
            seq_id: 1,
            payload: vec![0xFF, 0xFF, 0xFF],
        };
        frame.response().unwrap_err();
    }

    #[test]
    fn version_code_depends_on_region_marker() {
        assert_eq!(
            version_code("wss://webcast16-ws-useast1a.tiktok.com/webcast/im/push/v2/"),
            "270000"
        );
        assert_eq!(
            version_code("wss://webcast-ws.tiktok.com/webcast/im/push/v2/"),
            "180800"
        );
    }
}
