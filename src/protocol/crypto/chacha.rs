use byteorder::{ByteOrder, LittleEndian};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305 as ChaChaImpl, Nonce as ChaChaNonce};

use super::CryptoError;

/// 12-byte nonce for ChaCha20-Poly1305.
///
/// Two constructions exist on the wire: session frames use a little-endian
/// counter in the low bytes, pairing messages use fixed 8-byte ASCII
/// labels right-aligned in the field.
#[derive(Clone, Copy)]
pub struct Nonce([u8; 12]);

impl Nonce {
    /// Counter nonce: LE counter in bytes 0..8, bytes 8..12 zero.
    pub fn from_counter(counter: u64) -> Self {
        let mut arr = [0u8; 12];
        LittleEndian::write_u64(&mut arr[..8], counter);
        Self(arr)
    }

    /// Label nonce such as `PS-Msg05`: bytes 0..4 zero, label in 4..12.
    pub fn from_label(label: &[u8; 8]) -> Self {
        let mut arr = [0u8; 12];
        arr[4..].copy_from_slice(label);
        Self(arr)
    }

    /// Raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// ChaCha20-Poly1305 AEAD cipher around a fixed 32-byte key.
pub struct ChaCha20Poly1305Cipher {
    cipher: ChaChaImpl,
}

impl ChaCha20Poly1305Cipher {
    /// Build a cipher; 32-byte keys are always accepted.
    pub fn from_key(key: &[u8; 32]) -> Self {
        let cipher = match ChaChaImpl::new_from_slice(key) {
            Ok(cipher) => cipher,
            Err(_) => unreachable!("32-byte key is always accepted"),
        };
        Self { cipher }
    }

    /// Encrypt; the 16-byte tag is appended to the ciphertext. Pass an
    /// empty slice when there is no associated data.
    pub fn seal(&self, nonce: &Nonce, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(
                ChaChaNonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt and authenticate ciphertext carrying a trailing tag.
    pub fn open(&self, nonce: &Nonce, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(
                ChaChaNonce::from_slice(&nonce.0),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
