//! Tunnel error types.

use thiserror::Error;

/// Failures while establishing the attested key exchange.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("control channel closed before server_kx arrived")]
    MissingServerKx,
    #[error("malformed handshake message: {0}")]
    Malformed(String),
    #[error("could not open the sealed symmetric key")]
    SealedBoxOpen,
    #[error("server-side initialization failed (close code 1011)")]
    ServerInit,
    #[error("attestation rejected: {0}")]
    Attestation(#[from] qvl::VerifyError),
}

/// Failures on an established channel.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("could not decrypt a post-handshake envelope")]
    Decrypt,
    #[error("envelope too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("control channel closed{}", close_code_suffix(.code))]
    Closed { code: Option<u16> },
    #[error("transport error: {0}")]
    Transport(String),
}

fn close_code_suffix(code: &Option<u16>) -> String {
    match code {
        Some(code) => format!(" (code {code})"),
        None => String::new(),
    }
}

/// Top-level error surfaced by the client API.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TunnelError {
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    /// The session was torn down while the operation was pending.
    #[error("channel closed")]
    ChannelClosed,
    #[error("request timed out")]
    Timeout,
    /// The client was explicitly closed and will not reconnect.
    #[error("client closed")]
    ClientClosed,
}
