//! The `WebSocket`-like client surface.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use tokio::sync::{mpsc, oneshot};

use crate::{
    client::{random_id, Cmd, TunnelClient},
    error::TunnelError,
    ws::{ReadyState, WsPayload},
};

/// Events delivered to the application, mirroring the standard WebSocket
/// event surface (`onopen` / `onmessage` / `onclose` / `onerror`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsClientEvent {
    Open,
    Message(WsPayload),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
    Error(String),
}

/// A tunneled application-level WebSocket.
pub struct TunnelWebSocket {
    connection_id: String,
    client: TunnelClient,
    events: mpsc::Receiver<WsClientEvent>,
    state: Arc<AtomicU8>,
}

impl TunnelWebSocket {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// The next event. `None` once the connection (or the whole session)
    /// is gone.
    pub async fn recv(&mut self) -> Option<WsClientEvent> {
        self.events.recv().await
    }

    /// Send a text message.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TunnelError> {
        self.send_payload(WsPayload::Text(text.into()))
    }

    /// Send a binary message (base64 `arraybuffer` on the wire).
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), TunnelError> {
        self.send_payload(WsPayload::Binary(data.into()))
    }

    fn send_payload(&self, payload: WsPayload) -> Result<(), TunnelError> {
        self.client.send_cmd(Cmd::WsSend {
            connection_id: self.connection_id.clone(),
            payload,
        })
    }

    /// Close the connection.
    pub fn close(&self, code: Option<u16>, reason: Option<String>) {
        self.state.store(ReadyState::Closing as u8, Ordering::Relaxed);
        let _ = self.client.send_cmd(Cmd::WsClose {
            connection_id: self.connection_id.clone(),
            code,
            reason,
        });
    }
}

pub(crate) async fn open(client: &TunnelClient, url: String) -> Result<TunnelWebSocket, TunnelError> {
    let connection_id = random_id();
    let (events_tx, events_rx) = mpsc::channel(64);
    let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));

    let (reply_tx, reply_rx) = oneshot::channel();
    client.send_cmd(Cmd::WsOpen {
        url,
        connection_id: connection_id.clone(),
        events: events_tx,
        state: Arc::clone(&state),
        reply: reply_tx,
    })?;
    reply_rx.await.map_err(|_| TunnelError::ChannelClosed)??;

    Ok(TunnelWebSocket {
        connection_id,
        client: client.clone(),
        events: events_rx,
        state,
    })
}
