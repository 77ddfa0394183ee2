//! Session key material and payload encryption.
//!
//! Every bridge session owns an x25519 keypair. The hex-encoded public key is
//! the session's `client_id` at the relay; the private key round-trips
//! through hex so a restored connection can resume the same session.
//!
//! Payloads are sealed NaCl-box style: ECDH shared secret, SHA-256 key
//! derivation, XChaCha20-Poly1305 with a random 24-byte nonce prepended to
//! the ciphertext, base64 over the wire.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::errors::BridgeError;

/// Nonce length of XChaCha20-Poly1305.
const NONCE_LEN: usize = 24;

/// x25519 session keypair with NaCl-box style sealing.
#[derive(Clone)]
pub struct SessionCrypto {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the secret.
        f.debug_struct("SessionCrypto")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl SessionCrypto {
    /// Generate a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from a hex-encoded private key (restore path).
    pub fn from_private_key_hex(private_key: &str) -> Result<Self, BridgeError> {
        let bytes = decode_key(private_key)?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    /// Hex-encoded private key, for persistence.
    #[must_use]
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    /// Hex-encoded public key; the session's `client_id` at the relay.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Seal a payload for the given hex-encoded receiver public key.
    ///
    /// Returns base64(`nonce || ciphertext`).
    pub fn encrypt(&self, plaintext: &[u8], receiver_key: &str) -> Result<String, BridgeError> {
        let cipher = self.cipher_for(receiver_key)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| BridgeError::Crypto("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Open a base64 payload sealed by the given hex-encoded sender public key.
    pub fn decrypt(&self, message: &str, sender_key: &str) -> Result<Vec<u8>, BridgeError> {
        let sealed = BASE64
            .decode(message)
            .map_err(|e| BridgeError::Crypto(format!("invalid base64 payload: {e}")))?;
        if sealed.len() < NONCE_LEN {
            return Err(BridgeError::Crypto("payload shorter than nonce".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let cipher = self.cipher_for(sender_key)?;
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| BridgeError::Crypto("decryption failed".into()))
    }

    /// Derive the symmetric cipher shared with the given hex-encoded peer key.
    fn cipher_for(&self, peer_key: &str) -> Result<XChaCha20Poly1305, BridgeError> {
        let peer = PublicKey::from(decode_key(peer_key)?);
        let shared = self.secret.diffie_hellman(&peer);
        let key = Sha256::digest(shared.as_bytes());
        Ok(XChaCha20Poly1305::new(Key::from_slice(&key)))
    }
}

fn decode_key(key: &str) -> Result<[u8; 32], BridgeError> {
    let bytes = hex::decode(key).map_err(|e| BridgeError::InvalidKey(format!("bad hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| BridgeError::InvalidKey("key must be 32 bytes".into()))
}
