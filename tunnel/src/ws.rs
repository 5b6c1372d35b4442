//! Application-level WebSocket types shared by both tunnel ends.

use base64::Engine;

use crate::msg::{WsDataType, WsMessageMsg};

/// A payload on an application WebSocket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl WsPayload {
    /// Decode the `data` / `data_type` pair of a `ws_message`.
    pub(crate) fn from_wire(msg: &WsMessageMsg) -> Option<Self> {
        match msg.data_type {
            WsDataType::String => Some(Self::Text(msg.data.clone())),
            WsDataType::ArrayBuffer => base64::engine::general_purpose::STANDARD
                .decode(msg.data.as_bytes())
                .ok()
                .map(Self::Binary),
        }
    }

    /// Encode into the `data` / `data_type` pair of a `ws_message`.
    pub(crate) fn to_wire(&self) -> (String, WsDataType) {
        match self {
            Self::Text(text) => (text.clone(), WsDataType::String),
            Self::Binary(bytes) => (
                base64::engine::general_purpose::STANDARD.encode(bytes),
                WsDataType::ArrayBuffer,
            ),
        }
    }
}

/// Standard WebSocket ready states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wire_roundtrip() {
        let text = WsPayload::Text("hi".into());
        let (data, data_type) = text.to_wire();
        assert_eq!(data, "hi");
        assert_eq!(data_type, WsDataType::String);

        let binary = WsPayload::Binary(vec![0, 1, 2, 0xFF]);
        let (data, data_type) = binary.to_wire();
        assert_eq!(data_type, WsDataType::ArrayBuffer);
        let msg = WsMessageMsg {
            connection_id: "c".into(),
            data,
            data_type,
        };
        assert_eq!(WsPayload::from_wire(&msg), Some(binary));
    }
}
