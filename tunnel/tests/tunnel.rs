//! End-to-end tunnel tests over in-memory transports.
//!
//! A real `TunnelServer` (with a synthetic-but-correctly-signed TDX quote)
//! talks to a real `TunnelClient` through `transport::pair`, so everything
//! except the outer WebSocket plumbing is exercised: attested handshake,
//! envelope crypto, HTTP multiplexing, virtual WebSockets, reconnect
//! backoff, and teardown.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::future::BoxFuture;
use qvl::testutil::{build_tdx_quote_v4, ChainKind, QuoteParams, TestChain};
use tokio::{sync::mpsc, time::Instant};
use tunnel::{
    app_fn,
    client::Connect,
    crypto,
    msg::{ChannelMsg, ClientKx, ControlMsg, HttpRequestMsg},
    quote_fn,
    transport::{pair, Frame, FramePipe},
    verifier::VerifiedAttestation,
    ClientConfig, FetchInit, ServerConfig, TunnelClient, TunnelError, TunnelServer, WsClientEvent,
    WsIncoming, WsPayload,
};

const LISTEN_PORT: u16 = 8443;

/// A server whose quote binds the x25519 key into the TDX report data
/// (raw-key binding), plus the matching client verifier.
fn attested_server() -> (TunnelServer, WsIncoming, Arc<dyn tunnel::AttestationVerifier>) {
    tunnel::logger::init_for_testing();
    let chain = Arc::new(TestChain::new(ChainKind::IntelP256));

    let app = app_fn(|request: http::Request<bytes::Bytes>| async move {
        match request.uri().path() {
            "/uptime" => Ok(http::Response::builder()
                .status(200)
                .header("Content-Type", "application/json")
                .body(bytes::Bytes::from(r#"{"uptime_secs":42}"#))
                .expect("static response")),
            "/slow" => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            "/fail" => anyhow::bail!("backend exploded"),
            _ => Ok(http::Response::builder()
                .status(404)
                .body(bytes::Bytes::new())
                .expect("static response")),
        }
    });

    let quoting_chain = Arc::clone(&chain);
    let quote_hook = quote_fn(move |public_key: [u8; 32]| {
        let chain = Arc::clone(&quoting_chain);
        async move {
            let mut params = QuoteParams::default();
            params.report_data[..32].copy_from_slice(&public_key);
            Ok(build_tdx_quote_v4(&chain, &params))
        }
    });

    let (server, incoming) = TunnelServer::init(app, quote_hook, ServerConfig::new(LISTEN_PORT));

    let verify_chain = Arc::clone(&chain);
    let verifier: Arc<dyn tunnel::AttestationVerifier> = Arc::new(
        move |quote_bytes: &[u8], server_pk: &[u8; 32]| {
            let opts = qvl::VerifyOpts::at(std::time::SystemTime::now())
                .with_pinned_roots(verify_chain.pinned_roots())
                .with_tcb_policy(|_: &str, _: &qvl::Quote| true);
            let eval = qvl::evaluate_tdx(quote_bytes, &opts);
            if let Some(err) = eval.error {
                return Err(err);
            }
            let quote = eval.quote.expect("valid evaluation carries the quote");
            if quote.report_data().as_slice()[..32] != server_pk[..] {
                return Err(qvl::BindingError::ReportDataMismatch.into());
            }
            Ok(VerifiedAttestation {
                quote,
                server_public_key: *server_pk,
            })
        },
    );

    (server, incoming, verifier)
}

/// Connects each attempt straight into a fresh server session.
struct ServerConnector {
    server: TunnelServer,
}

impl Connect for ServerConnector {
    fn connect(&self) -> BoxFuture<'static, Result<FramePipe, TunnelError>> {
        let server = self.server.clone();
        Box::pin(async move {
            let (client_pipe, server_pipe) = pair(64);
            tokio::spawn(async move { server.handle_connection(server_pipe).await });
            Ok(client_pipe)
        })
    }
}

fn attested_client(server: &TunnelServer, verifier: Arc<dyn tunnel::AttestationVerifier>) -> TunnelClient {
    TunnelClient::connect_with(
        ServerConnector {
            server: server.clone(),
        },
        ClientConfig::new(verifier),
    )
}

#[tokio::test]
async fn test_handshake_and_fetch_roundtrip() {
    let (server, _incoming, verifier) = attested_server();
    let client = attested_client(&server, verifier);

    client.ensure_connection().await.unwrap();

    // the attestation is exposed for UIs
    let attestation = client.attestation().unwrap();
    assert_eq!(attestation.quote.family(), "TDX");
    assert_eq!(client.server_public_key().unwrap(), server.public_key());

    let response = client
        .fetch(
            format!("https://localhost:{LISTEN_PORT}/uptime"),
            FetchInit::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.ok());
    // case-insensitive header read
    assert_eq!(response.header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
    assert_eq!(body["uptime_secs"], 42);
}

#[tokio::test]
async fn test_app_handler_failure_surfaces_as_502() {
    let (server, _incoming, verifier) = attested_server();
    let client = attested_client(&server, verifier);

    let response = client
        .fetch(
            format!("https://localhost:{LISTEN_PORT}/fail"),
            FetchInit::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert!(response.error().unwrap().contains("backend exploded"));
}

#[tokio::test]
async fn test_unparseable_method_is_400() {
    let (server, _incoming, verifier) = attested_server();
    let client = attested_client(&server, verifier);

    let response = client
        .fetch(
            format!("https://localhost:{LISTEN_PORT}/uptime"),
            FetchInit::method("NOT A METHOD"),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.error().is_some());
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_handshake() {
    let (server, _incoming, verifier) = attested_server();
    let client = attested_client(&server, verifier);

    let url = format!("https://localhost:{LISTEN_PORT}/uptime");
    let (a, b, c) = tokio::join!(
        client.fetch(&url, FetchInit::default()),
        client.fetch(&url, FetchInit::default()),
        client.ensure_connection(),
    );
    assert_eq!(a.unwrap().status(), 200);
    assert_eq!(b.unwrap().status(), 200);
    c.unwrap();
}

#[tokio::test]
async fn test_rejected_attestation_fails_connection() {
    let (server, _incoming, _verifier) = attested_server();
    let rejecting: Arc<dyn tunnel::AttestationVerifier> = Arc::new(
        |_quote: &[u8], _pk: &[u8; 32]| -> Result<VerifiedAttestation, qvl::VerifyError> {
            Err(qvl::VerifyError::Measurement)
        },
    );
    let client = attested_client(&server, rejecting);

    let err = client.ensure_connection().await.unwrap_err();
    assert!(
        matches!(
            err,
            TunnelError::Handshake(tunnel::HandshakeError::Attestation(_))
        ),
        "{err:?}"
    );
}

/// Plaintext after the handshake starts is dropped, never fatal.
/// A hand-rolled client sends a plaintext http_request before its
/// client_kx; the server must ignore it and still complete the handshake.
#[tokio::test]
async fn test_plaintext_request_before_client_kx_is_ignored() {
    let (server, _incoming, _verifier) = attested_server();
    let (mut client_pipe, server_pipe) = pair(64);
    tokio::spawn(async move { server.handle_connection(server_pipe).await });

    // server_kx arrives first
    let Some(Frame::Text(text)) = client_pipe.next().await else {
        panic!("expected server_kx");
    };
    let ControlMsg::ServerKx(server_kx) = ControlMsg::from_json(&text).unwrap() else {
        panic!("expected server_kx, got {text}");
    };

    // plaintext http_request: must be ignored
    let plaintext_req = serde_json::to_string(&ChannelMsg::HttpRequest(HttpRequestMsg {
        request_id: "plaintext".into(),
        method: "GET".into(),
        url: format!("https://localhost:{LISTEN_PORT}/uptime"),
        headers: Default::default(),
        body: None,
    }))
    .unwrap();
    client_pipe.send(Frame::Text(plaintext_req)).await.unwrap();

    // proper handshake
    let key = crypto::SymmetricKey::generate();
    let sealed = crypto::seal_to(&server_kx.x25519_public_key, &key);
    client_pipe
        .send(Frame::Text(
            ControlMsg::ClientKx(ClientKx {
                sealed_symmetric_key: sealed,
            })
            .to_json(),
        ))
        .await
        .unwrap();

    // encrypted request round-trips; the plaintext one produced nothing
    let request = ChannelMsg::HttpRequest(HttpRequestMsg {
        request_id: "enc-1".into(),
        method: "GET".into(),
        url: format!("https://localhost:{LISTEN_PORT}/uptime"),
        headers: Default::default(),
        body: None,
    });
    let envelope = crypto::seal_envelope(&key, &request.to_json_bytes());
    client_pipe
        .send(Frame::Text(ControlMsg::Enc(envelope).to_json()))
        .await
        .unwrap();

    let Some(Frame::Text(text)) = client_pipe.next().await else {
        panic!("expected a response frame");
    };
    let ControlMsg::Enc(envelope) = ControlMsg::from_json(&text).unwrap() else {
        panic!("expected an encrypted response, got {text}");
    };
    let plaintext = crypto::open_envelope(&key, &envelope).unwrap();
    let ChannelMsg::HttpResponse(response) = ChannelMsg::from_json_bytes(&plaintext).unwrap()
    else {
        panic!("expected http_response");
    };
    assert_eq!(response.request_id, "enc-1");
    assert_eq!(response.status, 200);
}

/// A server that never sends server_kx causes the
/// client to reject with a handshake error.
#[tokio::test]
async fn test_server_without_server_kx_rejects() {
    let silent: Arc<dyn tunnel::AttestationVerifier> = Arc::new(
        |_: &[u8], _: &[u8; 32]| -> Result<VerifiedAttestation, qvl::VerifyError> {
            unreachable!("no quote ever arrives")
        },
    );
    let connector = move || -> BoxFuture<'static, Result<FramePipe, TunnelError>> {
        Box::pin(async move {
            let (client_pipe, server_pipe) = pair(8);
            tokio::spawn(async move {
                // close without ever sending server_kx
                let _ = server_pipe.send(Frame::Close(Some(1002))).await;
            });
            Ok(client_pipe)
        })
    };
    let client = TunnelClient::connect_with(connector, ClientConfig::new(silent));

    let err = client.ensure_connection().await.unwrap_err();
    assert_eq!(
        err,
        TunnelError::Handshake(tunnel::HandshakeError::MissingServerKx)
    );
}

/// Close code 1011 during the handshake surfaces as a connection error
/// (server-side initialization failed).
#[tokio::test]
async fn test_close_1011_is_server_init_error() {
    let silent: Arc<dyn tunnel::AttestationVerifier> = Arc::new(
        |_: &[u8], _: &[u8; 32]| -> Result<VerifiedAttestation, qvl::VerifyError> {
            unreachable!("no quote ever arrives")
        },
    );
    let connector = move || -> BoxFuture<'static, Result<FramePipe, TunnelError>> {
        Box::pin(async move {
            let (client_pipe, server_pipe) = pair(8);
            tokio::spawn(async move {
                let _ = server_pipe.send(Frame::Close(Some(1011))).await;
            });
            Ok(client_pipe)
        })
    };
    let client = TunnelClient::connect_with(connector, ClientConfig::new(silent));

    let err = client.ensure_connection().await.unwrap_err();
    assert_eq!(err, TunnelError::Handshake(tunnel::HandshakeError::ServerInit));
}

/// One canned quote + parsed attestation for the reconnect tests, which
/// stub the verifier.
fn canned_attestation() -> VerifiedAttestation {
    let chain = TestChain::new(ChainKind::IntelP256);
    let quote_bytes = build_tdx_quote_v4(&chain, &QuoteParams::default());
    VerifiedAttestation {
        quote: qvl::Quote::parse(&quote_bytes).unwrap(),
        server_public_key: [0u8; 32],
    }
}

/// A fake server endpoint: completes the handshake once, then closes with
/// the given code. Later connects close immediately (handshake failure),
/// so the backoff schedule is observable.
struct FlakyConnector {
    connects: Arc<Mutex<Vec<Instant>>>,
    notify: mpsc::UnboundedSender<usize>,
    close_code: u16,
    /// Whether connects after the first should complete the handshake.
    handshake_after_first: bool,
}

impl Connect for FlakyConnector {
    fn connect(&self) -> BoxFuture<'static, Result<FramePipe, TunnelError>> {
        let connects = Arc::clone(&self.connects);
        let notify = self.notify.clone();
        let close_code = self.close_code;
        let handshake_after_first = self.handshake_after_first;
        Box::pin(async move {
            let attempt = {
                let mut connects = connects.lock().unwrap();
                connects.push(Instant::now());
                connects.len()
            };
            let _ = notify.send(attempt);

            let (client_pipe, mut server_pipe) = pair(8);
            tokio::spawn(async move {
                if attempt == 1 || handshake_after_first {
                    let keypair = crypto::ServerKeyPair::generate();
                    let kx = ControlMsg::ServerKx(tunnel::msg::ServerKx {
                        x25519_public_key: keypair.public_bytes(),
                        quote: vec![0xAA; 16],
                    });
                    if server_pipe.send(Frame::Text(kx.to_json())).await.is_err() {
                        return;
                    }
                    // await client_kx so the client reaches Ready
                    loop {
                        match server_pipe.next().await {
                            Some(Frame::Text(text)) => {
                                if matches!(
                                    ControlMsg::from_json(&text),
                                    Ok(ControlMsg::ClientKx(_))
                                ) {
                                    break;
                                }
                            }
                            _ => return,
                        }
                    }
                }
                let _ = server_pipe.send(Frame::Close(Some(close_code))).await;
            });
            Ok(client_pipe)
        })
    }
}

fn stub_verifier() -> Arc<dyn tunnel::AttestationVerifier> {
    let attestation = canned_attestation();
    Arc::new(
        move |_quote: &[u8],
              server_pk: &[u8; 32]|
              -> Result<VerifiedAttestation, qvl::VerifyError> {
            let mut attestation = attestation.clone();
            attestation.server_public_key = *server_pk;
            Ok(attestation)
        },
    )
}

/// Reconnect waits 1000 ms, then 2000 ms, doubling to the 30 s cap; a
/// successful handshake resets the schedule.
#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_schedule() {
    let connects = Arc::new(Mutex::new(Vec::new()));
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let connector = FlakyConnector {
        connects: Arc::clone(&connects),
        notify: notify_tx,
        close_code: 1006,
        handshake_after_first: false,
    };
    let client = TunnelClient::connect_with(connector, ClientConfig::new(stub_verifier()));

    // first connection succeeds, then the channel force-closes with 1006
    client.ensure_connection().await.unwrap();

    // wait for 8 connect attempts in total
    while notify_rx.recv().await.unwrap() < 8 {}

    let connects = connects.lock().unwrap();
    let deltas: Vec<u64> = connects
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
        .collect();
    // reconnects after the forced close: 1s, 2s, 4s, 8s, 16s, 30s, 30s
    assert_eq!(deltas, [1000, 2000, 4000, 8000, 16_000, 30_000, 30_000]);

    client.close();
}

/// A successful open resets the reconnect delay.
#[tokio::test(start_paused = true)]
async fn test_reconnect_delay_resets_after_success() {
    let connects = Arc::new(Mutex::new(Vec::new()));
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let connector = FlakyConnector {
        connects: Arc::clone(&connects),
        notify: notify_tx,
        close_code: 1006,
        // every attempt completes the handshake before the forced close
        handshake_after_first: true,
    };
    let client = TunnelClient::connect_with(connector, ClientConfig::new(stub_verifier()));

    client.ensure_connection().await.unwrap();
    while notify_rx.recv().await.unwrap() < 4 {}

    let connects = connects.lock().unwrap();
    let deltas: Vec<u64> = connects
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
        .collect();
    // every reconnect follows a *successful* open, so the delay never grows
    assert_eq!(deltas, [1000, 1000, 1000]);

    client.close();
}

/// Close code 4000 means "intentional disconnect": no reconnect at all.
#[tokio::test(start_paused = true)]
async fn test_close_4000_suppresses_reconnect() {
    let connects = Arc::new(Mutex::new(Vec::new()));
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let connector = FlakyConnector {
        connects: Arc::clone(&connects),
        notify: notify_tx,
        close_code: 4000,
        handshake_after_first: false,
    };
    let client = TunnelClient::connect_with(connector, ClientConfig::new(stub_verifier()));

    client.ensure_connection().await.unwrap();
    assert_eq!(notify_rx.recv().await, Some(1));

    // plenty of paused time for a reconnect to have fired, were one coming
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connects.lock().unwrap().len(), 1);

    // and the session is terminally closed
    let err = client
        .fetch("https://localhost:8443/uptime", FetchInit::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, TunnelError::Channel(tunnel::ChannelError::Closed { code: Some(4000) })),
        "{err:?}"
    );
}

/// A ws_connect whose port differs from the server's
/// listen port yields ws_event{error} and never creates an endpoint.
#[tokio::test]
async fn test_ws_connect_port_binding() {
    let (server, mut incoming, verifier) = attested_server();
    let client = attested_client(&server, verifier);

    let mut rejected = client
        .websocket(format!("wss://localhost:{}/app", LISTEN_PORT + 1))
        .await
        .unwrap();
    match rejected.recv().await {
        Some(WsClientEvent::Error(error)) => assert!(error.contains("port"), "{error}"),
        other => panic!("expected error event, got {other:?}"),
    }

    // no virtual endpoint was created for the rejected connect; the
    // accepted one below is the first the server surfaces
    let mut accepted = client
        .websocket(format!("wss://localhost:{LISTEN_PORT}/app"))
        .await
        .unwrap();
    assert_eq!(accepted.recv().await, Some(WsClientEvent::Open));
    assert_eq!(accepted.ready_state(), tunnel::ReadyState::Open);

    let server_ws = tokio::time::timeout(Duration::from_secs(5), incoming.accept())
        .await
        .expect("an endpoint must arrive")
        .expect("server is alive");
    assert_eq!(server_ws.connection_id(), accepted.connection_id());
}

#[tokio::test]
async fn test_ws_bidirectional_messages() {
    let (server, mut incoming, verifier) = attested_server();
    let client = attested_client(&server, verifier);

    let mut ws = client
        .websocket(format!("wss://localhost:{LISTEN_PORT}/echo"))
        .await
        .unwrap();
    assert_eq!(ws.recv().await, Some(WsClientEvent::Open));
    let mut server_ws = incoming.accept().await.unwrap();

    // client -> server text
    ws.send_text("ping").unwrap();
    assert_eq!(server_ws.recv().await, Some(WsPayload::Text("ping".into())));

    // client -> server binary
    ws.send_binary(vec![0u8, 1, 2, 0xFF]).unwrap();
    assert_eq!(
        server_ws.recv().await,
        Some(WsPayload::Binary(vec![0u8, 1, 2, 0xFF]))
    );

    // server -> client, text via the heuristic
    server_ws.send(b"pong").await;
    assert_eq!(
        ws.recv().await,
        Some(WsClientEvent::Message(WsPayload::Text("pong".into())))
    );

    // server -> client, binary via the heuristic (NUL byte)
    server_ws.send(&[1u8, 0, 2]).await;
    assert_eq!(
        ws.recv().await,
        Some(WsClientEvent::Message(WsPayload::Binary(vec![1u8, 0, 2])))
    );

    // client close tears down the server endpoint
    ws.close(Some(1000), Some("done".into()));
    assert_eq!(server_ws.recv().await, None);
    assert_eq!(
        server_ws.close_info(),
        Some(&(Some(1000), Some("done".to_owned())))
    );
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_cancels_completer() {
    let (server, _incoming, verifier) = attested_server();
    let mut config = ClientConfig::new(verifier);
    config.request_timeout = Some(Duration::from_secs(2));
    let client = TunnelClient::connect_with(
        ServerConnector {
            server: server.clone(),
        },
        config,
    );

    let err = client
        .fetch(
            format!("https://localhost:{LISTEN_PORT}/slow"),
            FetchInit::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, TunnelError::Timeout);

    // the session is still healthy for other requests
    let response = client
        .fetch(
            format!("https://localhost:{LISTEN_PORT}/uptime"),
            FetchInit::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_close_fails_pending_fetches() {
    let (server, _incoming, verifier) = attested_server();
    let client = attested_client(&server, verifier);
    client.ensure_connection().await.unwrap();

    let pending_client = client.clone();
    let pending = tokio::spawn(async move {
        pending_client
            .fetch(
                format!("https://localhost:{LISTEN_PORT}/slow"),
                FetchInit::default(),
            )
            .await
    });

    // give the fetch a chance to register
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close();

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err, TunnelError::ChannelClosed);
}

/// A decrypt failure after the handshake is fatal to the session: the
/// client tears it down (and dials again) instead of silently dropping the
/// frame.
#[tokio::test(start_paused = true)]
async fn test_post_handshake_decrypt_failure_is_fatal() {
    let connects = Arc::new(Mutex::new(0usize));
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<usize>();

    let connects_ref = Arc::clone(&connects);
    let connector = move || -> BoxFuture<'static, Result<FramePipe, TunnelError>> {
        let connects = Arc::clone(&connects_ref);
        let notify = notify_tx.clone();
        Box::pin(async move {
            let attempt = {
                let mut connects = connects.lock().unwrap();
                *connects += 1;
                *connects
            };
            let _ = notify.send(attempt);

            let (client_pipe, mut server_pipe) = pair(8);
            tokio::spawn(async move {
                let keypair = crypto::ServerKeyPair::generate();
                let kx = ControlMsg::ServerKx(tunnel::msg::ServerKx {
                    x25519_public_key: keypair.public_bytes(),
                    quote: vec![0xAA; 16],
                });
                if server_pipe.send(Frame::Text(kx.to_json())).await.is_err() {
                    return;
                }
                loop {
                    match server_pipe.next().await {
                        Some(Frame::Text(text)) => {
                            if matches!(ControlMsg::from_json(&text), Ok(ControlMsg::ClientKx(_))) {
                                break;
                            }
                        }
                        _ => return,
                    }
                }
                // garbage envelope: random nonce+ciphertext under no key
                let bogus = ControlMsg::Enc(tunnel::msg::Envelope {
                    nonce: [9u8; 24],
                    ciphertext: vec![1, 2, 3, 4],
                });
                let _ = server_pipe.send(Frame::Text(bogus.to_json())).await;
                // keep the pipe open; the *client* must tear down
                futures::future::pending::<()>().await;
            });
            Ok(client_pipe)
        })
    };

    let client = TunnelClient::connect_with(connector, ClientConfig::new(stub_verifier()));
    client.ensure_connection().await.unwrap();

    // the poisoned session forces a reconnect
    while notify_rx.recv().await.unwrap() < 2 {}
    assert!(*connects.lock().unwrap() >= 2);
    client.close();
}
