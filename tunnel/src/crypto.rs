//! Session crypto: the server's x25519 keypair, the per-session symmetric
//! key, the sealed-box key exchange, and the post-handshake envelope.
//!
//! The envelope is XChaCha20-Poly1305 with an independently random 24-byte
//! nonce per message. The sealed box seals the client-chosen symmetric key
//! to the server's attested x25519 public key: an ephemeral Diffie-Hellman
//! exchange, HKDF-SHA256 over the shared secret (salted with both public
//! keys), then the same AEAD. Wire form: `epk(32) || nonce(24) || ct`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    AeadCore, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::{ChannelError, HandshakeError},
    msg::Envelope,
};

/// Length of the per-session symmetric key.
pub const SYMMETRIC_KEY_LEN: usize = 32;
/// Length of an envelope nonce.
pub const ENVELOPE_NONCE_LEN: usize = 24;
/// HKDF info string for the sealed-box key derivation.
const SEALED_BOX_INFO: &[u8] = b"tunnel sealed box v1";

/// The per-session 32-byte symmetric key. Single-use: generated by the
/// client at handshake, owned by exactly one session on each side.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SymmetricKey").field(&"..").finish()
    }
}

impl SymmetricKey {
    pub fn generate() -> Self {
        use rand_core::RngCore;
        let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&self.0))
    }
}

/// The server's process-wide x25519 keypair, generated at startup. It never
/// persists: clients re-verify the bound quote on every connection.
pub struct ServerKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ServerKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Open a client's sealed symmetric key.
    pub fn open_sealed(&self, sealed: &[u8]) -> Result<SymmetricKey, HandshakeError> {
        if sealed.len() < 32 + ENVELOPE_NONCE_LEN {
            return Err(HandshakeError::SealedBoxOpen);
        }
        let epk_bytes: [u8; 32] = sealed[..32].try_into().expect("checked length");
        let epk = PublicKey::from(epk_bytes);
        let nonce = XNonce::from_slice(&sealed[32..32 + ENVELOPE_NONCE_LEN]);
        let ciphertext = &sealed[32 + ENVELOPE_NONCE_LEN..];

        let shared = self.secret.diffie_hellman(&epk);
        let cipher = sealed_box_cipher(shared.as_bytes(), &epk, &self.public);
        let mut plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| HandshakeError::SealedBoxOpen)?;
        let key_bytes = <[u8; SYMMETRIC_KEY_LEN]>::try_from(plaintext.as_slice())
            .map_err(|_| HandshakeError::SealedBoxOpen)?;
        plaintext.zeroize();
        Ok(SymmetricKey::from_bytes(key_bytes))
    }
}

/// Seal `key` to the recipient's x25519 public key.
pub fn seal_to(recipient_pk: &[u8; 32], key: &SymmetricKey) -> Vec<u8> {
    let recipient = PublicKey::from(*recipient_pk);
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let epk = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient);

    let cipher = sealed_box_cipher(shared.as_bytes(), &epk, &recipient);
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, key.0.as_slice())
        .expect("XChaCha20-Poly1305 encryption is infallible for in-memory buffers");

    let mut out = Vec::with_capacity(32 + ENVELOPE_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(epk.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

fn sealed_box_cipher(shared: &[u8; 32], epk: &PublicKey, recipient: &PublicKey) -> XChaCha20Poly1305 {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(epk.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = [0u8; SYMMETRIC_KEY_LEN];
    hkdf.expand(SEALED_BOX_INFO, &mut okm)
        .expect("HKDF output length is valid");
    let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&okm));
    okm.zeroize();
    cipher
}

/// Encrypt a plaintext into an envelope with a fresh random nonce.
pub fn seal_envelope(key: &SymmetricKey, plaintext: &[u8]) -> Envelope {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(&nonce, plaintext)
        .expect("XChaCha20-Poly1305 encryption is infallible for in-memory buffers");
    Envelope {
        nonce: nonce.into(),
        ciphertext,
    }
}

/// Decrypt an envelope. Failure is fatal to the session.
pub fn open_envelope(key: &SymmetricKey, envelope: &Envelope) -> Result<Vec<u8>, ChannelError> {
    key.cipher()
        .decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| ChannelError::Decrypt)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let key = SymmetricKey::generate();
        let envelope = seal_envelope(&key, b"hello enclave");
        assert_eq!(envelope.nonce.len(), ENVELOPE_NONCE_LEN);
        assert_eq!(open_envelope(&key, &envelope).unwrap(), b"hello enclave");
    }

    #[test]
    fn test_envelope_nonces_are_unique() {
        let key = SymmetricKey::generate();
        let a = seal_envelope(&key, b"msg");
        let b = seal_envelope(&key, b"msg");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_envelope_wrong_key_fails() {
        let key = SymmetricKey::generate();
        let other = SymmetricKey::generate();
        let envelope = seal_envelope(&key, b"secret");
        assert_eq!(
            open_envelope(&other, &envelope).unwrap_err(),
            ChannelError::Decrypt
        );
    }

    #[test]
    fn test_envelope_tamper_fails() {
        let key = SymmetricKey::generate();
        let mut envelope = seal_envelope(&key, b"secret");
        envelope.ciphertext[0] ^= 1;
        assert_eq!(
            open_envelope(&key, &envelope).unwrap_err(),
            ChannelError::Decrypt
        );
    }

    #[test]
    fn test_sealed_box_roundtrip() {
        let server = ServerKeyPair::generate();
        let key = SymmetricKey::generate();
        let sealed = seal_to(&server.public_bytes(), &key);
        let opened = server.open_sealed(&sealed).unwrap();
        assert_eq!(opened.0, key.0);
    }

    #[test]
    fn test_sealed_box_wrong_recipient_fails() {
        let server = ServerKeyPair::generate();
        let other = ServerKeyPair::generate();
        let key = SymmetricKey::generate();
        let sealed = seal_to(&server.public_bytes(), &key);
        assert_eq!(
            other.open_sealed(&sealed).unwrap_err(),
            HandshakeError::SealedBoxOpen
        );
    }

    #[test]
    fn test_sealed_box_truncated_fails() {
        let server = ServerKeyPair::generate();
        assert_eq!(
            server.open_sealed(&[0u8; 10]).unwrap_err(),
            HandshakeError::SealedBoxOpen
        );
    }
}
