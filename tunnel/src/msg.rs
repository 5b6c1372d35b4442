//! Wire messages.
//!
//! Every frame on the control channel is a JSON object with a `"type"`
//! field. Only `server_kx` and `client_kx` are legal in plaintext; after
//! the handshake, everything travels inside an `enc` envelope whose
//! plaintext is the JSON of one [`ChannelMsg`]. Binary fields are base64.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Base64 serde helpers for `Vec<u8>` fields.
pub(crate) mod b64_bytes {
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(de::Error::custom)
    }
}

/// Base64 serde helpers for fixed-size byte array fields.
pub(crate) mod b64_array {
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(de::Error::custom)?;
        <[u8; N]>::try_from(bytes.as_slice())
            .map_err(|_| de::Error::custom(format!("expected {N} bytes")))
    }
}

/// A frame on the control channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMsg {
    ServerKx(ServerKx),
    ClientKx(ClientKx),
    Enc(Envelope),
}

impl ControlMsg {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("wire messages serialize")
    }
}

/// The server's opening move: its x25519 public key and a quote whose
/// report data binds that key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerKx {
    #[serde(with = "b64_array")]
    pub x25519_public_key: [u8; 32],
    #[serde(with = "b64_bytes")]
    pub quote: Vec<u8>,
}

/// The client's reply: the session symmetric key sealed to the server's
/// public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientKx {
    #[serde(with = "b64_bytes")]
    pub sealed_symmetric_key: Vec<u8>,
}

/// The post-handshake carrier: XChaCha20-Poly1305 with a random 24-byte
/// nonce per envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "b64_array")]
    pub nonce: [u8; 24],
    #[serde(with = "b64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// A message inside the envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMsg {
    HttpRequest(HttpRequestMsg),
    HttpResponse(HttpResponseMsg),
    WsConnect(WsConnectMsg),
    WsMessage(WsMessageMsg),
    WsClose(WsCloseMsg),
    WsEvent(WsEventMsg),
}

impl ChannelMsg {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("wire messages serialize")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestMsg {
    pub request_id: String,
    pub method: String,
    pub url: String,
    /// Header names are case-preserved on the wire; readers compare
    /// case-insensitively.
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseMsg {
    pub request_id: String,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsConnectMsg {
    pub connection_id: String,
    pub url: String,
}

/// Payload encoding of a `ws_message`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsDataType {
    String,
    #[serde(rename = "arraybuffer")]
    ArrayBuffer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsMessageMsg {
    pub connection_id: String,
    /// Text payload, or base64 when `data_type` is `arraybuffer`.
    pub data: String,
    pub data_type: WsDataType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsCloseMsg {
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsEventType {
    Open,
    Close,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsEventMsg {
    pub connection_id: String,
    pub event_type: WsEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_control_msg_tags() {
        let msg = ControlMsg::ServerKx(ServerKx {
            x25519_public_key: [1u8; 32],
            quote: vec![2, 3, 4],
        });
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["type"], "server_kx");
        assert!(json["x25519_public_key"].is_string());
        assert_eq!(ControlMsg::from_json(&msg.to_json()).unwrap(), msg);
    }

    #[test]
    fn test_envelope_tag_is_enc() {
        let msg = ControlMsg::Enc(Envelope {
            nonce: [7u8; 24],
            ciphertext: vec![1, 2, 3],
        });
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["type"], "enc");
    }

    #[test]
    fn test_channel_msg_roundtrip() {
        let msg = ChannelMsg::HttpRequest(HttpRequestMsg {
            request_id: "r1".into(),
            method: "GET".into(),
            url: "https://localhost:8443/uptime".into(),
            headers: [("X-Custom".to_owned(), "v".to_owned())].into(),
            body: None,
        });
        let bytes = msg.to_json_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "http_request");
        // absent body is omitted, not null
        assert!(json.get("body").is_none());
        assert_eq!(ChannelMsg::from_json_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_ws_data_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&WsDataType::ArrayBuffer).unwrap(),
            "\"arraybuffer\""
        );
        assert_eq!(
            serde_json::to_string(&WsDataType::String).unwrap(),
            "\"string\""
        );
    }

    #[test]
    fn test_ws_event_wire_shape() {
        let msg = ChannelMsg::WsEvent(WsEventMsg {
            connection_id: "c1".into(),
            event_type: WsEventType::Error,
            code: None,
            reason: None,
            error: Some("port mismatch".into()),
        });
        let json: serde_json::Value = serde_json::from_slice(&msg.to_json_bytes()).unwrap();
        assert_eq!(json["type"], "ws_event");
        assert_eq!(json["event_type"], "error");
        assert_eq!(json["error"], "port mismatch");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ControlMsg::from_json(r#"{"type":"http_request","request_id":"x"}"#).is_err());
        assert!(ControlMsg::from_json(r#"{"type":"bogus"}"#).is_err());
    }
}
