//! Tunnel client core.
//!
//! One actor task owns the control channel and all per-session state; the
//! [`TunnelClient`] handle sends it commands. The actor performs the
//! attested handshake, correlates `fetch` requests with responses, routes
//! WebSocket traffic, and reconnects with exponential backoff after
//! unexpected closes.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use rand_core::{OsRng, RngCore};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::{
    backoff::BackoffConfig,
    crypto::{self, SymmetricKey},
    error::{ChannelError, HandshakeError, TunnelError},
    msg::{
        ChannelMsg, ClientKx, ControlMsg, HttpRequestMsg, HttpResponseMsg, WsCloseMsg,
        WsConnectMsg, WsEventType, WsMessageMsg,
    },
    transport::{Frame, FramePipe, CLOSE_INTENTIONAL, CLOSE_SERVER_ERROR},
    verifier::{AttestationVerifier, VerifiedAttestation},
    ws::{ReadyState, WsPayload},
};

mod fetch;
mod websocket;

pub use fetch::{FetchInit, FetchResponse};
pub use websocket::{TunnelWebSocket, WsClientEvent};

/// Dials the control channel. The default implementation speaks WebSocket
/// via tokio-tungstenite; tests substitute in-memory transports.
pub trait Connect: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'static, Result<FramePipe, TunnelError>>;
}

impl<F> Connect for F
where
    F: Fn() -> BoxFuture<'static, Result<FramePipe, TunnelError>> + Send + Sync + 'static,
{
    fn connect(&self) -> BoxFuture<'static, Result<FramePipe, TunnelError>> {
        self()
    }
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Attestation policy for the server's quote and key binding.
    pub verifier: Arc<dyn AttestationVerifier>,
    /// Reconnect schedule after unexpected closes.
    pub backoff: BackoffConfig,
    /// Per-request timeout for `fetch`. `None` disables.
    pub request_timeout: Option<Duration>,
    /// Upper bound on envelope ciphertext size.
    pub max_envelope_bytes: usize,
}

impl ClientConfig {
    pub fn new(verifier: Arc<dyn AttestationVerifier>) -> Self {
        Self {
            verifier,
            backoff: BackoffConfig::default(),
            request_timeout: Some(Duration::from_secs(30)),
            max_envelope_bytes: 1 << 20,
        }
    }
}

/// Handle to a tunnel client session. Cloning shares the session.
#[derive(Clone)]
pub struct TunnelClient {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    shared: Arc<ClientShared>,
    request_timeout: Option<Duration>,
}

struct ClientShared {
    attestation: Mutex<Option<VerifiedAttestation>>,
}

impl TunnelClient {
    /// Connect to a tunnel server over WebSocket. The connection is
    /// established lazily on first use (or via [`ensure_connection`]).
    ///
    /// [`ensure_connection`]: TunnelClient::ensure_connection
    pub fn connect(url: impl Into<String>, config: ClientConfig) -> Self {
        Self::connect_with(WsConnector::new(url), config)
    }

    /// Connect through a custom transport.
    pub fn connect_with(connector: impl Connect, config: ClientConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ClientShared {
            attestation: Mutex::new(None),
        });
        let request_timeout = config.request_timeout;
        let actor = Actor {
            connector: Box::new(connector),
            config,
            cmd_rx,
            shared: Arc::clone(&shared),
        };
        tokio::spawn(actor.run());
        Self {
            cmd_tx,
            shared,
            request_timeout,
        }
    }

    /// Resolve once the session is Ready. Idempotent; concurrent callers
    /// share the same in-flight handshake.
    pub async fn ensure_connection(&self) -> Result<(), TunnelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::EnsureConnection { reply: reply_tx })
            .map_err(|_| TunnelError::ClientClosed)?;
        reply_rx.await.map_err(|_| TunnelError::ChannelClosed)?
    }

    /// Perform one HTTP exchange over the tunnel.
    pub async fn fetch(&self, url: impl Into<String>, init: FetchInit) -> Result<FetchResponse, TunnelError> {
        fetch::fetch(self, url.into(), init).await
    }

    /// Open an application-level WebSocket over the tunnel.
    pub async fn websocket(&self, url: impl Into<String>) -> Result<TunnelWebSocket, TunnelError> {
        websocket::open(self, url.into()).await
    }

    /// The verified attestation from the current (or last successful)
    /// handshake, for UIs that display attested measurements.
    pub fn attestation(&self) -> Option<VerifiedAttestation> {
        self.shared.attestation.lock().expect("attestation lock").clone()
    }

    /// The server's verified x25519 public key.
    pub fn server_public_key(&self) -> Option<[u8; 32]> {
        self.attestation().map(|att| att.server_public_key)
    }

    /// Close the session. Pending requests fail with `ChannelClosed`; no
    /// reconnect is attempted (the server sees close code 4000).
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Cmd::Close);
    }

    pub(crate) fn send_cmd(&self, cmd: Cmd) -> Result<(), TunnelError> {
        self.cmd_tx.send(cmd).map_err(|_| TunnelError::ClientClosed)
    }

    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }
}

/// A random 128-bit correlation id.
pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Commands from the handle to the actor.
pub(crate) enum Cmd {
    EnsureConnection {
        reply: oneshot::Sender<Result<(), TunnelError>>,
    },
    Fetch {
        request: HttpRequestMsg,
        reply: oneshot::Sender<Result<HttpResponseMsg, TunnelError>>,
    },
    CancelFetch {
        request_id: String,
    },
    WsOpen {
        url: String,
        connection_id: String,
        events: mpsc::Sender<WsClientEvent>,
        state: Arc<AtomicU8>,
        reply: oneshot::Sender<Result<(), TunnelError>>,
    },
    WsSend {
        connection_id: String,
        payload: WsPayload,
    },
    WsClose {
        connection_id: String,
        code: Option<u16>,
        reason: Option<String>,
    },
    Close,
}

/// One registered client-side WebSocket.
struct WsReg {
    events: mpsc::Sender<WsClientEvent>,
    state: Arc<AtomicU8>,
}

impl WsReg {
    fn set_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    async fn emit(&self, event: WsClientEvent) {
        match &event {
            WsClientEvent::Open => self.set_state(ReadyState::Open),
            WsClientEvent::Close { .. } => self.set_state(ReadyState::Closed),
            WsClientEvent::Error(_) => (),
            WsClientEvent::Message(_) => (),
        }
        let _ = self.events.send(event).await;
    }
}

/// An established session.
struct Session {
    pipe: FramePipe,
    key: SymmetricKey,
    pending: HashMap<String, oneshot::Sender<Result<HttpResponseMsg, TunnelError>>>,
    websockets: HashMap<String, WsReg>,
}

impl Session {
    async fn send_channel_msg(&self, msg: &ChannelMsg) -> Result<(), TunnelError> {
        let envelope = crypto::seal_envelope(&self.key, &msg.to_json_bytes());
        self.pipe
            .send(Frame::Text(ControlMsg::Enc(envelope).to_json()))
            .await
            .map_err(TunnelError::Channel)
    }

    /// Fail every pending completer and close every WebSocket.
    async fn teardown(mut self, close_code: Option<u16>) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(TunnelError::ChannelClosed));
        }
        for (_, reg) in self.websockets.drain() {
            reg.emit(WsClientEvent::Close {
                code: close_code,
                reason: None,
            })
            .await;
        }
    }
}

enum ConnectError {
    /// Retry with backoff.
    Transient(TunnelError),
    /// Stop; every subsequent operation fails with this error.
    Fatal(TunnelError),
}

/// What the session loop observed when it ended.
enum SessionEnd {
    /// Closed by the peer or transport; reconnect unless code 4000.
    Closed(Option<u16>),
    /// Local decrypt failure; fatal to the session, reconnect allowed.
    Poisoned,
}

struct Actor {
    connector: Box<dyn Connect>,
    config: ClientConfig,
    cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    shared: Arc<ClientShared>,
}

impl Actor {
    async fn run(mut self) {
        // Commands that arrived while disconnected and need a session.
        let mut queued: Vec<Cmd> = Vec::new();
        // Ensure waiters for the in-flight connection attempt.
        let mut waiters: Vec<oneshot::Sender<Result<(), TunnelError>>> = Vec::new();
        // `Some` while in reconnect mode.
        let mut backoff: Option<Box<dyn Iterator<Item = Duration> + Send>> = None;

        'disconnected: loop {
            // Wait for demand (or for the reconnect timer, when we are in
            // automatic reconnect mode after an unexpected close).
            if backoff.is_none() && queued.is_empty() && waiters.is_empty() {
                match self.cmd_rx.recv().await {
                    None => return,
                    Some(Cmd::Close) => return self.shutdown(queued, waiters).await,
                    Some(cmd) => self.queue_cmd(cmd, &mut queued, &mut waiters),
                }
                // commands that don't need a session (dropped sends) must
                // not trigger a dial
                if queued.is_empty() && waiters.is_empty() {
                    continue 'disconnected;
                }
            }

            if let Some(schedule) = &mut backoff {
                let delay = schedule.next().expect("backoff iterator is infinite");
                debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        () = &mut sleep => break,
                        cmd = self.cmd_rx.recv() => match cmd {
                            None => return,
                            Some(Cmd::Close) => return self.shutdown(queued, waiters).await,
                            Some(cmd) => self.queue_cmd(cmd, &mut queued, &mut waiters),
                        }
                    }
                }
            }

            // One connection attempt.
            match self.try_connect().await {
                Ok(mut session) => {
                    backoff = None;
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(Ok(()));
                    }
                    for cmd in queued.drain(..) {
                        self.handle_cmd_connected(&mut session, cmd).await;
                    }

                    match self.run_session(&mut session).await {
                        SessionEnd::Closed(Some(CLOSE_INTENTIONAL)) => {
                            session.teardown(Some(CLOSE_INTENTIONAL)).await;
                            return self
                                .fail_forever(TunnelError::Channel(ChannelError::Closed {
                                    code: Some(CLOSE_INTENTIONAL),
                                }))
                                .await;
                        }
                        SessionEnd::Closed(code) => {
                            warn!(?code, "control channel closed unexpectedly");
                            session.teardown(code).await;
                            backoff = Some(Box::new(self.config.backoff.iter()));
                        }
                        SessionEnd::Poisoned => {
                            let _ = session.pipe.send(Frame::Close(None)).await;
                            session.teardown(None).await;
                            backoff = Some(Box::new(self.config.backoff.iter()));
                        }
                    }
                }
                Err(ConnectError::Transient(err)) => {
                    debug!("connection attempt failed: {err}");
                    // The current waiters asked for *this* connection; they
                    // get the failure. Reconnection continues for traffic
                    // that arrives later.
                    self.fail_waiters(&mut queued, &mut waiters, &err).await;
                    if backoff.is_none() {
                        backoff = Some(Box::new(self.config.backoff.iter()));
                    }
                    continue 'disconnected;
                }
                Err(ConnectError::Fatal(err)) => {
                    error!("connection failed fatally: {err}");
                    self.fail_waiters(&mut queued, &mut waiters, &err).await;
                    return self.fail_forever(err).await;
                }
            }
        }
    }

    /// Route a command received while disconnected.
    fn queue_cmd(
        &self,
        cmd: Cmd,
        queued: &mut Vec<Cmd>,
        waiters: &mut Vec<oneshot::Sender<Result<(), TunnelError>>>,
    ) {
        match cmd {
            Cmd::EnsureConnection { reply } => waiters.push(reply),
            Cmd::CancelFetch { .. } => (),
            // sends for sessions that no longer exist
            Cmd::WsSend { .. } | Cmd::WsClose { .. } => {
                debug!("dropping WebSocket command while disconnected")
            }
            Cmd::Close => unreachable!("Close is handled by the caller"),
            cmd => queued.push(cmd),
        }
    }

    async fn fail_waiters(
        &self,
        queued: &mut Vec<Cmd>,
        waiters: &mut Vec<oneshot::Sender<Result<(), TunnelError>>>,
        err: &TunnelError,
    ) {
        for waiter in waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        for cmd in queued.drain(..) {
            fail_cmd(cmd, err.clone()).await;
        }
    }

    /// Terminal state: answer every future command with `err`.
    async fn fail_forever(self, err: TunnelError) {
        let mut cmd_rx = self.cmd_rx;
        while let Some(cmd) = cmd_rx.recv().await {
            fail_cmd(cmd, err.clone()).await;
        }
    }

    /// Explicit close: notify the server with code 4000 semantics (handled
    /// by the session loop caller) and fail the backlog.
    async fn shutdown(
        self,
        queued: Vec<Cmd>,
        waiters: Vec<oneshot::Sender<Result<(), TunnelError>>>,
    ) {
        for waiter in waiters {
            let _ = waiter.send(Err(TunnelError::ClientClosed));
        }
        for cmd in queued {
            fail_cmd(cmd, TunnelError::ClientClosed).await;
        }
        self.fail_forever(TunnelError::ClientClosed).await;
    }

    /// Dial and run the attested handshake.
    async fn try_connect(&self) -> Result<Session, ConnectError> {
        let mut pipe = self
            .connector
            .connect()
            .await
            .map_err(ConnectError::Transient)?;

        // Await server_kx. Anything else before it is noise.
        let server_kx = loop {
            match pipe.next().await {
                None => {
                    return Err(ConnectError::Transient(
                        HandshakeError::MissingServerKx.into(),
                    ))
                }
                Some(Frame::Close(Some(CLOSE_SERVER_ERROR))) => {
                    return Err(ConnectError::Fatal(HandshakeError::ServerInit.into()))
                }
                Some(Frame::Close(_)) => {
                    return Err(ConnectError::Transient(
                        HandshakeError::MissingServerKx.into(),
                    ))
                }
                Some(Frame::Text(text)) => match ControlMsg::from_json(&text) {
                    Ok(ControlMsg::ServerKx(kx)) => break kx,
                    Ok(_) => debug!("dropping pre-handshake frame"),
                    Err(err) => debug!("dropping unparseable pre-handshake frame: {err}"),
                },
            }
        };

        // Verify the quote and its binding to the announced key. A policy
        // rejection will not heal by retrying.
        let attestation = self
            .config
            .verifier
            .verify(&server_kx.quote, &server_kx.x25519_public_key)
            .map_err(|err| ConnectError::Fatal(HandshakeError::Attestation(err).into()))?;

        // Seal a fresh symmetric key to the attested public key.
        let key = SymmetricKey::generate();
        let sealed = crypto::seal_to(&server_kx.x25519_public_key, &key);
        let client_kx = ControlMsg::ClientKx(ClientKx {
            sealed_symmetric_key: sealed,
        });
        pipe.send(Frame::Text(client_kx.to_json()))
            .await
            .map_err(|err| ConnectError::Transient(err.into()))?;

        *self.shared.attestation.lock().expect("attestation lock") = Some(attestation);
        debug!("session ready");

        Ok(Session {
            pipe,
            key,
            pending: HashMap::new(),
            websockets: HashMap::new(),
        })
    }

    /// The Ready loop: dispatch frames and commands until the session ends.
    async fn run_session(&mut self, session: &mut Session) -> SessionEnd {
        loop {
            tokio::select! {
                frame = session.pipe.next() => match frame {
                    None => return SessionEnd::Closed(None),
                    Some(Frame::Close(code)) => return SessionEnd::Closed(code),
                    Some(Frame::Text(text)) => {
                        if let Some(end) = self.handle_frame(session, &text).await {
                            return end;
                        }
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return SessionEnd::Closed(None),
                    Some(Cmd::Close) => {
                        let _ = session.pipe.send(Frame::Close(Some(CLOSE_INTENTIONAL))).await;
                        return SessionEnd::Closed(Some(CLOSE_INTENTIONAL));
                    }
                    Some(cmd) => self.handle_cmd_connected(session, cmd).await,
                },
            }
        }
    }

    async fn handle_frame(&self, session: &mut Session, text: &str) -> Option<SessionEnd> {
        match ControlMsg::from_json(text) {
            Ok(ControlMsg::Enc(envelope)) => {
                if envelope.ciphertext.len() > self.config.max_envelope_bytes {
                    error!(size = envelope.ciphertext.len(), "oversized envelope");
                    return Some(SessionEnd::Poisoned);
                }
                match crypto::open_envelope(&session.key, &envelope) {
                    Ok(plaintext) => match ChannelMsg::from_json_bytes(&plaintext) {
                        Ok(msg) => {
                            self.dispatch(session, msg).await;
                            None
                        }
                        Err(err) => {
                            warn!("dropping undecodable channel message: {err}");
                            None
                        }
                    },
                    // Decrypt failure after the handshake is fatal.
                    Err(_) => {
                        error!("envelope decrypt failure, tearing down session");
                        Some(SessionEnd::Poisoned)
                    }
                }
            }
            Ok(_) => {
                warn!("dropping plaintext frame after handshake");
                None
            }
            Err(err) => {
                warn!("dropping unparseable frame: {err}");
                None
            }
        }
    }

    async fn dispatch(&self, session: &mut Session, msg: ChannelMsg) {
        match msg {
            ChannelMsg::HttpResponse(response) => {
                match session.pending.remove(&response.request_id) {
                    Some(reply) => {
                        let _ = reply.send(Ok(response));
                    }
                    None => debug!(
                        request_id = %response.request_id,
                        "dropping late or cancelled response"
                    ),
                }
            }
            ChannelMsg::WsEvent(event) => {
                let Some(reg) = session.websockets.get(&event.connection_id) else {
                    debug!(connection_id = %event.connection_id, "event for unknown connection");
                    return;
                };
                match event.event_type {
                    WsEventType::Open => reg.emit(WsClientEvent::Open).await,
                    WsEventType::Close => {
                        reg.emit(WsClientEvent::Close {
                            code: event.code,
                            reason: event.reason,
                        })
                        .await;
                        session.websockets.remove(&event.connection_id);
                    }
                    WsEventType::Error => {
                        reg.emit(WsClientEvent::Error(
                            event.error.unwrap_or_else(|| "unknown error".to_owned()),
                        ))
                        .await;
                        reg.set_state(ReadyState::Closed);
                        session.websockets.remove(&event.connection_id);
                    }
                }
            }
            ChannelMsg::WsMessage(message) => {
                let Some(reg) = session.websockets.get(&message.connection_id) else {
                    debug!(connection_id = %message.connection_id, "message for unknown connection");
                    return;
                };
                match WsPayload::from_wire(&message) {
                    Some(payload) => reg.emit(WsClientEvent::Message(payload)).await,
                    None => warn!("dropping ws_message with undecodable payload"),
                }
            }
            ChannelMsg::WsClose(close) => {
                if let Some(reg) = session.websockets.remove(&close.connection_id) {
                    reg.emit(WsClientEvent::Close {
                        code: close.code,
                        reason: close.reason,
                    })
                    .await;
                }
            }
            // client-bound frames only
            ChannelMsg::HttpRequest(_) | ChannelMsg::WsConnect(_) => {
                warn!("dropping server-bound message arriving at client");
            }
        }
    }

    async fn handle_cmd_connected(&self, session: &mut Session, cmd: Cmd) {
        match cmd {
            Cmd::EnsureConnection { reply } => {
                let _ = reply.send(Ok(()));
            }
            Cmd::Fetch { request, reply } => {
                let request_id = request.request_id.clone();
                let msg = ChannelMsg::HttpRequest(request);
                match session.send_channel_msg(&msg).await {
                    Ok(()) => {
                        session.pending.insert(request_id, reply);
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            Cmd::CancelFetch { request_id } => {
                // late responses get dropped by `dispatch`
                session.pending.remove(&request_id);
            }
            Cmd::WsOpen {
                url,
                connection_id,
                events,
                state,
                reply,
            } => {
                let reg = WsReg { events, state };
                let msg = ChannelMsg::WsConnect(WsConnectMsg {
                    connection_id: connection_id.clone(),
                    url,
                });
                match session.send_channel_msg(&msg).await {
                    Ok(()) => {
                        session.websockets.insert(connection_id, reg);
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            Cmd::WsSend {
                connection_id,
                payload,
            } => {
                let (data, data_type) = payload.to_wire();
                let msg = ChannelMsg::WsMessage(WsMessageMsg {
                    connection_id,
                    data,
                    data_type,
                });
                let _ = session.send_channel_msg(&msg).await;
            }
            Cmd::WsClose {
                connection_id,
                code,
                reason,
            } => {
                if let Some(reg) = session.websockets.remove(&connection_id) {
                    reg.set_state(ReadyState::Closed);
                }
                let msg = ChannelMsg::WsClose(WsCloseMsg {
                    connection_id,
                    code,
                    reason,
                });
                let _ = session.send_channel_msg(&msg).await;
            }
            Cmd::Close => unreachable!("Close is handled by the session loop"),
        }
    }
}

/// Fail a command that will never be served.
async fn fail_cmd(cmd: Cmd, err: TunnelError) {
    match cmd {
        Cmd::EnsureConnection { reply } => {
            let _ = reply.send(Err(err));
        }
        Cmd::Fetch { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Cmd::WsOpen { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Cmd::CancelFetch { .. } | Cmd::WsSend { .. } | Cmd::WsClose { .. } | Cmd::Close => (),
    }
}

/// The production connector: tokio-tungstenite.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connect for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<FramePipe, TunnelError>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (socket, _response) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|err| {
                    TunnelError::Channel(ChannelError::Transport(format!("connect: {err}")))
                })?;
            let (pipe, remote) = crate::transport::pair(64);
            tokio::spawn(pump_tungstenite_socket(socket, remote));
            Ok(pipe)
        })
    }
}

/// Pump frames between a tungstenite WebSocket and the session's pipe.
async fn pump_tungstenite_socket(
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    pipe: FramePipe,
) {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message};

    let (out_tx, mut out_rx) = (pipe.sender(), pipe);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.next().await {
            match frame {
                Frame::Text(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Frame::Close(code) => {
                    let close_frame = code.map(|code| CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    });
                    let _ = ws_tx.send(Message::Close(close_frame)).await;
                    break;
                }
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if out_tx.send(Frame::Text(text)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(close_frame)) => {
                let code = close_frame.map(|frame| u16::from(frame.code));
                let _ = out_tx.send(Frame::Close(code)).await;
                break;
            }
            Ok(Message::Binary(_)) => debug!("dropping unexpected binary frame"),
            Ok(_) => (), // ping/pong/raw
            Err(err) => {
                debug!("control socket error: {err}");
                let _ = out_tx.send(Frame::Close(None)).await;
                break;
            }
        }
    }

    writer.abort();
}
