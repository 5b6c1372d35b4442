//! # tunnel: attested end-to-end-encrypted channels
//!
//! A pair of endpoints that establish an x25519-keyed, authenticated-
//! encryption channel whose server-side key material is bound to a
//! `qvl`-verified quote. Over this channel the tunnel multiplexes HTTP
//! request/response pairs and application-level WebSocket sessions.
//!
//! The flow: a client opens the control WebSocket; the server immediately
//! announces its x25519 public key and a quote whose report data binds that
//! key; the client verifies the quote with its policy, seals a fresh
//! symmetric key to the server's key, and from then on every message
//! travels inside an XChaCha20-Poly1305 envelope.
//!
//! The server core is host-framework-agnostic ([`server::TunnelServer`]
//! takes an app handler and a quoting hook); the client exposes a
//! `fetch`-like and a `WebSocket`-like surface ([`client::TunnelClient`]).

/// Reconnect backoff schedules.
pub mod backoff;
/// Text/binary payload classification.
pub mod binary;
/// Client core: session actor, `fetch`, WebSockets.
pub mod client;
/// Session crypto: sealed box and envelopes.
pub mod crypto;
/// Error types.
pub mod error;
/// Logger init helpers.
pub mod logger;
/// Wire messages.
pub mod msg;
/// Server core: handshake, dispatch, virtual WebSockets.
pub mod server;
/// The frame transport boundary.
pub mod transport;
/// The attestation verifier seam.
pub mod verifier;
/// Shared application WebSocket types.
pub mod ws;

pub use backoff::BackoffConfig;
pub use client::{
    ClientConfig, Connect, FetchInit, FetchResponse, TunnelClient, TunnelWebSocket, WsClientEvent,
};
pub use error::{ChannelError, HandshakeError, TunnelError};
pub use server::{app_fn, quote_fn, ServerConfig, TunnelServer, VirtualWebSocket, WsIncoming};
pub use verifier::{AttestationVerifier, KeyBinding, QuoteFamily, QvlVerifier, VerifiedAttestation};
pub use ws::{ReadyState, WsPayload};
