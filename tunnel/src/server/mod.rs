//! Tunnel server core.
//!
//! Host-app-agnostic: the server synthesizes in-process HTTP exchanges
//! against an injected `app_handler` and surfaces tunneled WebSockets as
//! virtual in-process endpoints. The surrounding web framework only has to
//! deliver control-channel frames; an axum integration is provided for the
//! common case.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::extract::{
    ws::{self, WebSocket},
    State, WebSocketUpgrade,
};
use bytes::Bytes;
use futures::{future::BoxFuture, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    crypto::{self, ServerKeyPair, SymmetricKey},
    msg::{
        ChannelMsg, ControlMsg, HttpRequestMsg, HttpResponseMsg, ServerKx, WsEventMsg, WsEventType,
    },
    transport::{Frame, FramePipe, CLOSE_SERVER_ERROR},
    ws::WsPayload,
};

mod vws;

pub use vws::{VirtualWebSocket, WsIncoming};
pub(crate) use vws::VwsEvent;

/// The injected application: one synthetic HTTP exchange at a time. The
/// core imposes no framework; adapt whatever router the host uses.
pub type AppHandler =
    Arc<dyn Fn(http::Request<Bytes>) -> BoxFuture<'static, anyhow::Result<http::Response<Bytes>>> + Send + Sync>;

/// The host TEE's quoting hook: x25519 public key in, quote whose report
/// data binds that key out. The core neither retries nor caches.
pub type QuoteFn = Arc<dyn Fn([u8; 32]) -> BoxFuture<'static, anyhow::Result<Vec<u8>>> + Send + Sync>;

/// Box an async closure into an [`AppHandler`].
pub fn app_fn<F, Fut>(f: F) -> AppHandler
where
    F: Fn(http::Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<http::Response<Bytes>>> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// Box an async closure into a [`QuoteFn`].
pub fn quote_fn<F, Fut>(f: F) -> QuoteFn
where
    F: Fn([u8; 32]) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    Arc::new(move |public_key| Box::pin(f(public_key)))
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// The port this server listens on. `ws_connect` URLs naming any other
    /// port are rejected: the tunnel never proxies outbound.
    pub listen_port: u16,
    /// Upper bound on envelope ciphertext size.
    pub max_envelope_bytes: usize,
}

impl ServerConfig {
    pub fn new(listen_port: u16) -> Self {
        Self {
            listen_port,
            max_envelope_bytes: 1 << 20,
        }
    }
}

struct ServerShared {
    app: AppHandler,
    quote_fn: QuoteFn,
    keypair: ServerKeyPair,
    config: ServerConfig,
    ws_incoming_tx: mpsc::Sender<VirtualWebSocket>,
}

/// The tunnel server. Cheap to clone; one per process.
#[derive(Clone)]
pub struct TunnelServer {
    shared: Arc<ServerShared>,
}

impl TunnelServer {
    /// Create a server with a fresh process-wide x25519 keypair. Returns
    /// the server and the stream of tunneled WebSocket connections.
    pub fn init(app: AppHandler, quote_fn: QuoteFn, config: ServerConfig) -> (Self, WsIncoming) {
        let (ws_incoming_tx, ws_incoming_rx) = mpsc::channel(64);
        let keypair = ServerKeyPair::generate();
        info!("tunnel server key generated");
        let server = Self {
            shared: Arc::new(ServerShared {
                app,
                quote_fn,
                keypair,
                config,
                ws_incoming_tx,
            }),
        };
        (server, WsIncoming { rx: ws_incoming_rx })
    }

    /// The server's x25519 public key (the one quotes bind).
    pub fn public_key(&self) -> [u8; 32] {
        self.shared.keypair.public_bytes()
    }

    /// An axum router serving the control channel at `/`.
    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .route("/", axum::routing::any(ws_upgrade))
            .with_state(self.clone())
    }

    /// Drive one control-channel connection to completion.
    pub async fn handle_connection(&self, mut pipe: FramePipe) {
        let shared = &self.shared;

        // Immediately announce our key, bound into a fresh quote.
        let public_key = shared.keypair.public_bytes();
        let quote = match (shared.quote_fn)(public_key).await {
            Ok(quote) => quote,
            Err(err) => {
                error!("quote_fn failed: {err:#}");
                let _ = pipe.send(Frame::Close(Some(CLOSE_SERVER_ERROR))).await;
                return;
            }
        };
        let server_kx = ControlMsg::ServerKx(ServerKx {
            x25519_public_key: public_key,
            quote,
        });
        if pipe.send(Frame::Text(server_kx.to_json())).await.is_err() {
            return;
        }

        // Await the sealed session key. Everything else is pre-handshake
        // noise: dropped, never fatal.
        let key = loop {
            match pipe.next().await {
                None | Some(Frame::Close(_)) => return,
                Some(Frame::Text(text)) => match ControlMsg::from_json(&text) {
                    Ok(ControlMsg::ClientKx(kx)) => {
                        match shared.keypair.open_sealed(&kx.sealed_symmetric_key) {
                            Ok(key) => break key,
                            Err(err) => {
                                warn!("rejecting client_kx: {err}");
                                let _ = pipe.send(Frame::Close(Some(1008))).await;
                                return;
                            }
                        }
                    }
                    Ok(_) => debug!("dropping pre-handshake frame"),
                    Err(err) => debug!("dropping unparseable pre-handshake frame: {err}"),
                },
            }
        };

        let session = Arc::new(SessionState {
            key,
            out: pipe.sender(),
            websockets: Mutex::new(HashMap::new()),
        });
        debug!("session ready");

        // Ready: dispatch loop.
        loop {
            match pipe.next().await {
                None | Some(Frame::Close(_)) => break,
                Some(Frame::Text(text)) => match ControlMsg::from_json(&text) {
                    Ok(ControlMsg::Enc(envelope)) => {
                        if envelope.ciphertext.len() > shared.config.max_envelope_bytes {
                            error!(
                                size = envelope.ciphertext.len(),
                                "envelope too large, tearing down session"
                            );
                            break;
                        }
                        match crypto::open_envelope(&session.key, &envelope) {
                            Ok(plaintext) => match ChannelMsg::from_json_bytes(&plaintext) {
                                Ok(msg) => self.dispatch(&session, msg).await,
                                Err(err) => warn!("dropping undecodable channel message: {err}"),
                            },
                            Err(_) => {
                                // Unrecoverable: the peer is using a
                                // different key or corrupting traffic.
                                error!("envelope decrypt failure, tearing down session");
                                break;
                            }
                        }
                    }
                    // Plaintext after the handshake is a protocol
                    // violation, but only for the offending frame.
                    Ok(_) => warn!("dropping plaintext frame after handshake"),
                    Err(err) => warn!("dropping unparseable frame: {err}"),
                },
            }
        }

        session.teardown();
    }

    async fn dispatch(&self, session: &Arc<SessionState>, msg: ChannelMsg) {
        match msg {
            ChannelMsg::HttpRequest(request) => {
                let app = self.shared.app.clone();
                let session = Arc::clone(session);
                tokio::spawn(async move {
                    let response = run_app(&app, request).await;
                    session
                        .send_channel_msg(&ChannelMsg::HttpResponse(response))
                        .await;
                });
            }
            ChannelMsg::WsConnect(connect) => self.handle_ws_connect(session, connect).await,
            ChannelMsg::WsMessage(message) => {
                let target = session.websocket_sender(&message.connection_id);
                match (target, WsPayload::from_wire(&message)) {
                    (Some(tx), Some(payload)) => {
                        if tx.send(VwsEvent::Message(payload)).await.is_err() {
                            debug!(
                                connection_id = %message.connection_id,
                                "dropping ws_message for closed endpoint"
                            );
                        }
                    }
                    (None, _) => debug!(
                        connection_id = %message.connection_id,
                        "dropping ws_message for unknown connection"
                    ),
                    (_, None) => warn!(
                        connection_id = %message.connection_id,
                        "dropping ws_message with undecodable payload"
                    ),
                }
            }
            ChannelMsg::WsClose(close) => {
                if let Some(tx) = session.remove_websocket(&close.connection_id) {
                    let _ = tx
                        .send(VwsEvent::Closed {
                            code: close.code,
                            reason: close.reason,
                        })
                        .await;
                }
            }
            // server-bound frames only; these flow the other way
            ChannelMsg::HttpResponse(_) | ChannelMsg::WsEvent(_) => {
                warn!("dropping client-bound message arriving at server");
            }
        }
    }

    async fn handle_ws_connect(
        &self,
        session: &Arc<SessionState>,
        connect: crate::msg::WsConnectMsg,
    ) {
        let connection_id = connect.connection_id.clone();

        // No outbound proxying: the URL must name this server's own port.
        if let Err(reason) = self.check_ws_url(&connect.url) {
            warn!(connection_id = %connection_id, %reason, "rejecting ws_connect");
            session
                .send_channel_msg(&ChannelMsg::WsEvent(WsEventMsg {
                    connection_id,
                    event_type: WsEventType::Error,
                    code: None,
                    reason: None,
                    error: Some(reason),
                }))
                .await;
            return;
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        session.register_websocket(connection_id.clone(), events_tx);
        let endpoint = VirtualWebSocket::new(
            connection_id.clone(),
            Arc::downgrade(session),
            events_rx,
        );

        if self.shared.ws_incoming_tx.send(endpoint).await.is_err() {
            session.remove_websocket(&connection_id);
            session
                .send_channel_msg(&ChannelMsg::WsEvent(WsEventMsg {
                    connection_id,
                    event_type: WsEventType::Error,
                    code: None,
                    reason: None,
                    error: Some("server is not accepting WebSocket connections".to_owned()),
                }))
                .await;
            return;
        }

        session
            .send_channel_msg(&ChannelMsg::WsEvent(WsEventMsg {
                connection_id,
                event_type: WsEventType::Open,
                code: None,
                reason: None,
                error: None,
            }))
            .await;
    }

    fn check_ws_url(&self, url: &str) -> Result<(), String> {
        let uri: http::Uri = url
            .parse()
            .map_err(|_| format!("unparseable WebSocket URL: {url}"))?;
        let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
            Some("wss") | Some("https") => 443,
            _ => 80,
        });
        if port != self.shared.config.listen_port {
            return Err(format!(
                "port {port} does not match the server's listen port {}",
                self.shared.config.listen_port
            ));
        }
        Ok(())
    }

    /// Adapt an axum WebSocket into the frame transport and run the
    /// session.
    pub async fn handle_socket(&self, socket: WebSocket) {
        let (pipe, remote) = crate::transport::pair(64);
        let pump = tokio::spawn(pump_axum_socket(socket, remote));
        self.handle_connection(pipe).await;
        pump.abort();
    }
}

/// Per-connection state. The session exclusively owns its symmetric key;
/// virtual endpoints keep only weak references back.
pub(crate) struct SessionState {
    key: SymmetricKey,
    out: mpsc::Sender<Frame>,
    websockets: Mutex<HashMap<String, mpsc::Sender<VwsEvent>>>,
}

impl SessionState {
    /// Seal and send one channel message. Errors only mean the connection
    /// is already gone.
    pub(crate) async fn send_channel_msg(&self, msg: &ChannelMsg) {
        let envelope = crypto::seal_envelope(&self.key, &msg.to_json_bytes());
        let frame = Frame::Text(ControlMsg::Enc(envelope).to_json());
        if self.out.send(frame).await.is_err() {
            debug!("dropping outbound message: connection gone");
        }
    }

    fn register_websocket(&self, connection_id: String, tx: mpsc::Sender<VwsEvent>) {
        self.websockets
            .lock()
            .expect("websocket map lock")
            .insert(connection_id, tx);
    }

    fn websocket_sender(&self, connection_id: &str) -> Option<mpsc::Sender<VwsEvent>> {
        self.websockets
            .lock()
            .expect("websocket map lock")
            .get(connection_id)
            .cloned()
    }

    fn remove_websocket(&self, connection_id: &str) -> Option<mpsc::Sender<VwsEvent>> {
        self.websockets
            .lock()
            .expect("websocket map lock")
            .remove(connection_id)
    }

    pub(crate) fn unregister_websocket(&self, connection_id: &str) {
        self.remove_websocket(connection_id);
    }

    /// Drop every endpoint sender; their `recv` streams end.
    fn teardown(&self) {
        self.websockets
            .lock()
            .expect("websocket map lock")
            .clear();
    }
}

/// Synthesize one HTTP exchange against the app handler.
async fn run_app(app: &AppHandler, msg: HttpRequestMsg) -> HttpResponseMsg {
    let request_id = msg.request_id.clone();

    let request = match build_request(msg) {
        Ok(request) => request,
        Err(reason) => {
            return HttpResponseMsg {
                request_id,
                status: 400,
                status_text: "Bad Request".to_owned(),
                headers: Default::default(),
                body: String::new(),
                error: Some(reason),
            }
        }
    };

    match app(request).await {
        Ok(response) => {
            let status = response.status();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_owned(), v.to_owned()))
                })
                .collect();
            let body = String::from_utf8_lossy(response.body()).into_owned();
            HttpResponseMsg {
                request_id,
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_owned(),
                headers,
                body,
                error: None,
            }
        }
        Err(err) => HttpResponseMsg {
            request_id,
            status: 502,
            status_text: "Bad Gateway".to_owned(),
            headers: Default::default(),
            body: String::new(),
            error: Some(format!("{err:#}")),
        },
    }
}

fn build_request(msg: HttpRequestMsg) -> Result<http::Request<Bytes>, String> {
    let mut builder = http::Request::builder()
        .method(msg.method.as_str())
        .uri(msg.url.as_str());
    for (name, value) in &msg.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Bytes::from(msg.body.unwrap_or_default()))
        .map_err(|err| format!("invalid request: {err}"))
}

async fn ws_upgrade(
    State(server): State<TunnelServer>,
    upgrade: WebSocketUpgrade,
) -> axum::response::Response {
    upgrade.on_upgrade(move |socket| async move { server.handle_socket(socket).await })
}

/// Pump frames between an axum WebSocket and the session's pipe.
async fn pump_axum_socket(socket: WebSocket, pipe: FramePipe) {
    let (out_tx, mut out_rx) = (pipe.sender(), pipe);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.next().await {
            match frame {
                Frame::Text(text) => {
                    if ws_tx.send(ws::Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Frame::Close(code) => {
                    let close_frame = code.map(|code| ws::CloseFrame {
                        code,
                        reason: Default::default(),
                    });
                    let _ = ws_tx.send(ws::Message::Close(close_frame)).await;
                    break;
                }
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(ws::Message::Text(text)) => {
                if out_tx
                    .send(Frame::Text(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(ws::Message::Close(close_frame)) => {
                let code = close_frame.map(|frame| frame.code);
                let _ = out_tx.send(Frame::Close(code)).await;
                break;
            }
            // the wire protocol is JSON text frames
            Ok(ws::Message::Binary(_)) => debug!("dropping unexpected binary frame"),
            Ok(_) => (), // ping/pong
            Err(err) => {
                debug!("control socket error: {err}");
                let _ = out_tx.send(Frame::Close(None)).await;
                break;
            }
        }
    }

    writer.abort();
}
