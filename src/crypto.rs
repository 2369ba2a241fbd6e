//! Key material for the sealed coprocessor backend
//!
//! The coprocessor holds an X25519 key pair that never leaves the engine.
//! Clients seal input plaintexts to the coprocessor's public key; the
//! coprocessor seals its own results to itself and re-seals plaintexts to a
//! client key when the decryption gateway re-encrypts.
//!
//! ## Payload format
//!
//! Every sealed payload is `[nonce][sender public key][ciphertext + tag]`:
//! a 12-byte ChaCha20-Poly1305 nonce, the 32-byte X25519 public key of the
//! sealing party, and the AEAD output. The receiver derives the shared secret
//! from its own secret and the embedded sender key, so a payload the
//! coprocessor sealed to itself opens through the same path as a client input.
//!
//! Both roles are traits so a different scheme can be plugged in without
//! touching the backend.

use chacha20poly1305::{
    ChaCha20Poly1305,
    Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use rand::RngCore;
use revm::primitives::keccak256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::BackendError;

/// Size of nonce for ChaCha20-Poly1305 (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of X25519 public key (256 bits)
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Smallest well-formed sealed payload (empty plaintext)
pub const MIN_SEALED_LEN: usize = NONCE_SIZE + PUBLIC_KEY_SIZE + TAG_SIZE;

/// Key pair held by the coprocessor
pub trait CoprocessorKeyPair: Clone + std::fmt::Debug {
    /// Generate a fresh key pair
    fn generate() -> Self;

    /// Public key clients seal inputs to
    fn public_key_bytes(&self) -> Vec<u8>;

    /// Open a payload sealed by a client or by the coprocessor itself
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, BackendError>;

    /// Seal data to the coprocessor itself
    ///
    /// The nonce is derived from `nonce_seed`, which makes sealing
    /// deterministic: equal seeds must only ever be used for equal plaintexts.
    fn seal_to_self(&self, data: &[u8], nonce_seed: &[u8]) -> Result<Vec<u8>, BackendError>;

    /// Seal data for a client public key
    fn seal_for(&self, data: &[u8], recipient_public_key: &[u8]) -> Result<Vec<u8>, BackendError>;
}

/// Key pair held by a client submitting inputs and receiving re-encryptions
pub trait ClientKeyPair: Clone + std::fmt::Debug {
    /// Generate a fresh key pair
    fn generate() -> Self;

    /// Public key the coprocessor re-encrypts to
    fn public_key_bytes(&self) -> Vec<u8>;

    /// Seal an input plaintext for the coprocessor
    fn seal_for_coprocessor(
        &self,
        data: &[u8],
        coprocessor_public_key: &[u8],
    ) -> Result<Vec<u8>, BackendError>;

    /// Open a payload the coprocessor sealed for this client
    fn open_from_coprocessor(&self, sealed: &[u8]) -> Result<Vec<u8>, BackendError>;
}

fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, BackendError> {
    let key: [u8; PUBLIC_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| BackendError::Seal("invalid public key size".to_string()))?;
    Ok(PublicKey::from(key))
}

fn seal_with(
    secret: &StaticSecret,
    sender: &PublicKey,
    recipient: &PublicKey,
    nonce_bytes: [u8; NONCE_SIZE],
    data: &[u8],
) -> Result<Vec<u8>, BackendError> {
    let shared_secret = secret.diffie_hellman(recipient);
    let cipher = ChaCha20Poly1305::new(shared_secret.as_bytes().into());
    let ciphertext = cipher
        .encrypt(&Nonce::from(nonce_bytes), data)
        .map_err(|_| BackendError::Seal("encryption failed".to_string()))?;

    let mut payload = Vec::with_capacity(NONCE_SIZE + PUBLIC_KEY_SIZE + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(sender.as_bytes());
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

fn open_with(secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>, BackendError> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(BackendError::Open("sealed payload too short".to_string()));
    }

    let nonce_bytes: [u8; NONCE_SIZE] = sealed[..NONCE_SIZE]
        .try_into()
        .map_err(|_| BackendError::Open("invalid nonce".to_string()))?;
    let sender_bytes: [u8; PUBLIC_KEY_SIZE] = sealed[NONCE_SIZE..NONCE_SIZE + PUBLIC_KEY_SIZE]
        .try_into()
        .map_err(|_| BackendError::Open("invalid sender key".to_string()))?;

    let shared_secret = secret.diffie_hellman(&PublicKey::from(sender_bytes));
    let cipher = ChaCha20Poly1305::new(shared_secret.as_bytes().into());
    cipher
        .decrypt(
            &Nonce::from(nonce_bytes),
            &sealed[NONCE_SIZE + PUBLIC_KEY_SIZE..],
        )
        .map_err(|_| BackendError::Open("authentication failed".to_string()))
}

fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// X25519 key pair of the coprocessor
#[derive(Clone)]
pub struct CoprocessorKeys {
    secret: StaticSecret,
    /// Public key - can be shared publicly
    pub public_key: PublicKey,
}

impl std::fmt::Debug for CoprocessorKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoprocessorKeys")
            .field("public_key", &hex::encode(self.public_key.as_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl CoprocessorKeys {
    /// Build from a fixed secret (deterministic tests)
    pub fn from_secret(secret: StaticSecret) -> Self {
        let public_key = PublicKey::from(&secret);
        Self { secret, public_key }
    }
}

impl CoprocessorKeyPair for CoprocessorKeys {
    fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.as_bytes().to_vec()
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, BackendError> {
        open_with(&self.secret, sealed)
    }

    fn seal_to_self(&self, data: &[u8], nonce_seed: &[u8]) -> Result<Vec<u8>, BackendError> {
        let digest = keccak256(nonce_seed);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest[..NONCE_SIZE]);
        seal_with(&self.secret, &self.public_key, &self.public_key, nonce, data)
    }

    fn seal_for(&self, data: &[u8], recipient_public_key: &[u8]) -> Result<Vec<u8>, BackendError> {
        let recipient = parse_public_key(recipient_public_key)?;
        seal_with(
            &self.secret,
            &self.public_key,
            &recipient,
            random_nonce(),
            data,
        )
    }
}

/// X25519 key pair of a client
#[derive(Clone)]
pub struct ClientKeys {
    secret: StaticSecret,
    /// Public key - sent along with inputs and re-encryption requests
    pub public_key: PublicKey,
}

impl std::fmt::Debug for ClientKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKeys")
            .field("public_key", &hex::encode(self.public_key.as_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl ClientKeys {
    /// Build from a fixed secret (deterministic tests)
    pub fn from_secret(secret: StaticSecret) -> Self {
        let public_key = PublicKey::from(&secret);
        Self { secret, public_key }
    }
}

impl ClientKeyPair for ClientKeys {
    fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.as_bytes().to_vec()
    }

    fn seal_for_coprocessor(
        &self,
        data: &[u8],
        coprocessor_public_key: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        let recipient = parse_public_key(coprocessor_public_key)?;
        seal_with(
            &self.secret,
            &self.public_key,
            &recipient,
            random_nonce(),
            data,
        )
    }

    fn open_from_coprocessor(&self, sealed: &[u8]) -> Result<Vec<u8>, BackendError> {
        open_with(&self.secret, sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let coprocessor = CoprocessorKeys::generate();
        let client = ClientKeys::generate();

        assert_eq!(coprocessor.public_key_bytes().len(), PUBLIC_KEY_SIZE);
        assert_eq!(client.public_key_bytes().len(), PUBLIC_KEY_SIZE);
    }

    #[test]
    fn test_client_input_opens_inside_coprocessor() {
        let coprocessor = CoprocessorKeys::generate();
        let client = ClientKeys::generate();

        let sealed = client
            .seal_for_coprocessor(&[0x05], &coprocessor.public_key_bytes())
            .expect("seal failed");
        assert_eq!(sealed.len(), MIN_SEALED_LEN + 1);
        assert_eq!(
            &sealed[NONCE_SIZE..NONCE_SIZE + PUBLIC_KEY_SIZE],
            &client.public_key_bytes()[..]
        );

        assert_eq!(coprocessor.open(&sealed).expect("open failed"), vec![0x05]);
    }

    #[test]
    fn test_self_sealing_is_deterministic_per_seed() {
        let coprocessor = CoprocessorKeys::generate();

        let a = coprocessor.seal_to_self(b"value", b"seed").expect("seal");
        let b = coprocessor.seal_to_self(b"value", b"seed").expect("seal");
        let c = coprocessor.seal_to_self(b"value", b"other seed").expect("seal");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(coprocessor.open(&a).expect("open"), b"value");
    }

    #[test]
    fn test_reencryption_only_opens_for_recipient() {
        let coprocessor = CoprocessorKeys::generate();
        let alice = ClientKeys::generate();
        let mallory = ClientKeys::generate();

        let sealed = coprocessor
            .seal_for(b"balance", &alice.public_key_bytes())
            .expect("seal");

        assert_eq!(alice.open_from_coprocessor(&sealed).expect("open"), b"balance");
        assert!(mallory.open_from_coprocessor(&sealed).is_err());
    }

    #[test]
    fn test_tampered_payload_fails_to_open() {
        let coprocessor = CoprocessorKeys::generate();
        let client = ClientKeys::generate();

        let mut sealed = client
            .seal_for_coprocessor(b"Original message", &coprocessor.public_key_bytes())
            .expect("seal");
        if let Some(byte) = sealed.get_mut(NONCE_SIZE + PUBLIC_KEY_SIZE + 3) {
            *byte ^= 0x01;
        }

        assert!(coprocessor.open(&sealed).is_err());
        assert!(coprocessor.open(&sealed[..10]).is_err());
    }
}
