//! Virtual WebSocket endpoints.
//!
//! A successful `ws_connect` creates an in-process endpoint pair: the
//! session dispatcher feeds inbound messages to a [`VirtualWebSocket`]
//! handed to the application, and the endpoint's `send`/`close` seal frames
//! back through the session. No outbound socket ever exists, which is how
//! the server enforces "no proxying".
//!
//! Endpoints hold only a weak reference to their session: after teardown,
//! `send` and `close` become no-ops.

use std::sync::Weak;

use tokio::sync::mpsc;

use crate::{
    binary,
    msg::{ChannelMsg, WsCloseMsg, WsMessageMsg},
    server::SessionState,
    ws::WsPayload,
};

/// Inbound item for a virtual endpoint.
pub(crate) enum VwsEvent {
    Message(WsPayload),
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// The application's view of one tunneled WebSocket connection.
pub struct VirtualWebSocket {
    connection_id: String,
    session: Weak<SessionState>,
    events: mpsc::Receiver<VwsEvent>,
    /// Close info observed from the peer, once.
    peer_close: Option<(Option<u16>, Option<String>)>,
}

impl VirtualWebSocket {
    pub(crate) fn new(
        connection_id: String,
        session: Weak<SessionState>,
        events: mpsc::Receiver<VwsEvent>,
    ) -> Self {
        Self {
            connection_id,
            session,
            events,
            peer_close: None,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The peer's close code and reason, once the connection has closed.
    pub fn close_info(&self) -> Option<&(Option<u16>, Option<String>)> {
        self.peer_close.as_ref()
    }

    /// Receive the next message. `None` after the connection closed (from
    /// either side) or the session tore down.
    pub async fn recv(&mut self) -> Option<WsPayload> {
        if self.peer_close.is_some() {
            return None;
        }
        match self.events.recv().await {
            Some(VwsEvent::Message(payload)) => Some(payload),
            Some(VwsEvent::Closed { code, reason }) => {
                self.peer_close = Some((code, reason));
                None
            }
            None => None,
        }
    }

    /// Send a text message.
    pub async fn send_text(&self, text: impl Into<String>) {
        self.send_payload(WsPayload::Text(text.into())).await
    }

    /// Send bytes; the text/binary heuristic picks the wire encoding.
    pub async fn send(&self, data: &[u8]) {
        let payload = match binary::classify(data) {
            crate::msg::WsDataType::String => {
                WsPayload::Text(String::from_utf8(data.to_vec()).expect("classified as UTF-8"))
            }
            crate::msg::WsDataType::ArrayBuffer => WsPayload::Binary(data.to_vec()),
        };
        self.send_payload(payload).await
    }

    async fn send_payload(&self, payload: WsPayload) {
        // no-op after session teardown
        let Some(session) = self.session.upgrade() else {
            tracing::debug!(
                connection_id = %self.connection_id,
                "dropping send on torn-down session"
            );
            return;
        };
        let (data, data_type) = payload.to_wire();
        session
            .send_channel_msg(&ChannelMsg::WsMessage(WsMessageMsg {
                connection_id: self.connection_id.clone(),
                data,
                data_type,
            }))
            .await;
    }

    /// Close the connection.
    pub async fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        session.unregister_websocket(&self.connection_id);
        session
            .send_channel_msg(&ChannelMsg::WsClose(WsCloseMsg {
                connection_id: self.connection_id.clone(),
                code,
                reason,
            }))
            .await;
    }
}

/// The application-level WebSocket-server view: a stream of virtual
/// connections, one per successfully tunneled `ws_connect`.
pub struct WsIncoming {
    pub(crate) rx: mpsc::Receiver<VirtualWebSocket>,
}

impl WsIncoming {
    /// The next tunneled connection. `None` once the server is dropped.
    pub async fn accept(&mut self) -> Option<VirtualWebSocket> {
        self.rx.recv().await
    }
}
