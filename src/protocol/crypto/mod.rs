//! Cryptographic primitives for Companion pairing and session encryption

#![allow(missing_docs)]

mod chacha;
mod ed25519;
mod error;
mod hkdf;
mod srp;
mod x25519;

pub use self::chacha::{ChaCha20Poly1305Cipher, Nonce};
pub use self::ed25519::{Ed25519KeyPair, verify_signature};
pub use self::error::CryptoError;
pub use self::hkdf::derive_key;
pub use self::srp::{SrpClient, SrpVerifier};
pub use self::x25519::X25519KeyPair;

/// Length of various cryptographic values
pub mod lengths {
    /// Ed25519 public key length
    pub const ED25519_PUBLIC_KEY: usize = 32;
    /// Ed25519 seed length
    pub const ED25519_SEED: usize = 32;
    /// Ed25519 signature length
    pub const ED25519_SIGNATURE: usize = 64;
    /// X25519 public key length
    pub const X25519_PUBLIC_KEY: usize = 32;
    /// ChaCha20-Poly1305 key length
    pub const CHACHA_KEY: usize = 32;
    /// ChaCha20-Poly1305 nonce length
    pub const CHACHA_NONCE: usize = 12;
    /// ChaCha20-Poly1305 tag length
    pub const CHACHA_TAG: usize = 16;
    /// SRP-6a 3072-bit group size in bytes
    pub const SRP_GROUP: usize = 384;
}
