//! Payload sealing for datawallet modifications.
//!
//! Every payload is bound to the log index it is stored at: the key is
//! derived from the index and the index is authenticated as associated data.
//! [`OpenedPayload`] and [`SealedPayload`] therefore carry their index as a
//! private field that can only be set at construction, so ciphertext never
//! travels without the index it must be opened at.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use datawallet_types::ModificationIndex;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

use crate::constants::PAYLOAD_KEY_INFO;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("key derivation failed for index {0}")]
    KeyDerivation(ModificationIndex),
    #[error("sealing payload for index {0} failed")]
    Seal(ModificationIndex),
    #[error("payload at index {0} could not be authenticated")]
    Open(ModificationIndex),
    #[error("payload at index {index} is malformed: {reason}")]
    Malformed {
        index: ModificationIndex,
        reason: String,
    },
    #[error("payload serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A decrypted payload and the index it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenedPayload {
    index: ModificationIndex,
    value: serde_json::Value,
}

impl OpenedPayload {
    pub fn new(index: ModificationIndex, value: serde_json::Value) -> Self {
        Self { index, value }
    }

    pub fn index(&self) -> ModificationIndex {
        self.index
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn into_parts(self) -> (ModificationIndex, serde_json::Value) {
        (self.index, self.value)
    }
}

/// Ciphertext and the index it was sealed for.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedPayload {
    index: ModificationIndex,
    bytes: Vec<u8>,
}

impl SealedPayload {
    pub fn new(index: ModificationIndex, bytes: Vec<u8>) -> Self {
        Self { index, bytes }
    }

    /// Decode the wire form of a payload stored at `index`.
    pub fn from_base64(index: ModificationIndex, encoded: &str) -> Result<Self, SecretsError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| SecretsError::Malformed {
                index,
                reason: e.to_string(),
            })?;
        Ok(Self { index, bytes })
    }

    pub fn index(&self) -> ModificationIndex {
        self.index
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

impl std::fmt::Debug for SealedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedPayload")
            .field("index", &self.index)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Per-device secret management, keyed by log index.
#[async_trait]
pub trait DatawalletSecrets: Send + Sync {
    async fn seal(&self, payload: OpenedPayload) -> Result<SealedPayload, SecretsError>;
    async fn open(&self, sealed: &SealedPayload) -> Result<OpenedPayload, SecretsError>;
}

/// HKDF-SHA256 per-index keys over a shared datawallet master key, sealed
/// with ChaCha20-Poly1305.
///
/// Wire layout: `nonce (12 bytes) || ciphertext+tag`. The big-endian index
/// is the associated data.
pub struct DeviceSecrets {
    master_key: [u8; 32],
}

impl DeviceSecrets {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    /// A fresh random master key.
    pub fn generate() -> Self {
        let mut master_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut master_key);
        Self { master_key }
    }

    fn cipher_for(&self, index: ModificationIndex) -> Result<ChaCha20Poly1305, SecretsError> {
        let hkdf = Hkdf::<Sha256>::new(None, &self.master_key);
        let mut info = Vec::with_capacity(PAYLOAD_KEY_INFO.len() + 8);
        info.extend_from_slice(PAYLOAD_KEY_INFO);
        info.extend_from_slice(&index.get().to_be_bytes());

        let mut okm = [0u8; 32];
        hkdf.expand(&info, &mut okm)
            .map_err(|_| SecretsError::KeyDerivation(index))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&okm)))
    }
}

impl std::fmt::Debug for DeviceSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeviceSecrets(..)")
    }
}

#[async_trait]
impl DatawalletSecrets for DeviceSecrets {
    async fn seal(&self, payload: OpenedPayload) -> Result<SealedPayload, SecretsError> {
        let (index, value) = payload.into_parts();
        let plaintext = serde_json::to_vec(&value)?;
        let aad = index.get().to_be_bytes();

        let cipher = self.cipher_for(index)?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| SecretsError::Seal(index))?;

        let mut bytes = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        bytes.extend_from_slice(nonce.as_slice());
        bytes.extend_from_slice(&ciphertext);
        Ok(SealedPayload::new(index, bytes))
    }

    async fn open(&self, sealed: &SealedPayload) -> Result<OpenedPayload, SecretsError> {
        let index = sealed.index();
        if sealed.bytes().len() < NONCE_LEN {
            return Err(SecretsError::Malformed {
                index,
                reason: format!("{} bytes is shorter than a nonce", sealed.bytes().len()),
            });
        }
        let (nonce, ciphertext) = sealed.bytes().split_at(NONCE_LEN);
        let aad = index.get().to_be_bytes();

        let cipher = self.cipher_for(index)?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| SecretsError::Open(index))?;

        let value = serde_json::from_slice(&plaintext)?;
        Ok(OpenedPayload::new(index, value))
    }
}
