//! The frame transport boundary.
//!
//! The session cores speak [`FramePipe`]: a pair of bounded channels
//! carrying text frames and a terminal close frame. Adapter tasks pump a
//! real WebSocket (tokio-tungstenite on the client, axum on the server)
//! into a pipe; tests wire two pipes back to back with [`pair`].

use tokio::sync::mpsc;

use crate::error::ChannelError;

/// Close code for an abnormal closure (no close frame received).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code meaning "intentional disconnect; do not reconnect".
pub const CLOSE_INTENTIONAL: u16 = 4000;
/// Close code meaning server-side initialization failed.
pub const CLOSE_SERVER_ERROR: u16 = 1011;

/// One frame on the control channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A text frame carrying one JSON wire message.
    Text(String),
    /// Channel closed, with the close code if one was received.
    Close(Option<u16>),
}

/// A bidirectional frame channel. Dropping the pipe closes both directions.
pub struct FramePipe {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

impl FramePipe {
    pub fn new(tx: mpsc::Sender<Frame>, rx: mpsc::Receiver<Frame>) -> Self {
        Self { tx, rx }
    }

    /// Send a frame to the peer.
    pub async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| ChannelError::Transport("peer went away".to_owned()))
    }

    /// Receive the next frame. `None` means the peer vanished without a
    /// close frame; callers treat it as [`CLOSE_ABNORMAL`].
    pub async fn next(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// A clonable sender for tasks that only write (HTTP responders,
    /// virtual WebSocket endpoints).
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.tx.clone()
    }
}

/// An in-memory transport: two pipes wired back to back. Used by tests and
/// by in-process tunnels.
pub fn pair(capacity: usize) -> (FramePipe, FramePipe) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (FramePipe::new(a_tx, b_rx), FramePipe::new(b_tx, a_rx))
}
