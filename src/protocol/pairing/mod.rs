//! HAP pairing protocol: pair-setup (SRP) and pair-verify (X25519)

pub mod credentials;
pub mod setup;
pub mod tlv;
pub mod verify;


pub use credentials::HapCredentials;
pub use setup::PairSetup;
pub use tlv::{TlvDecoder, TlvEncoder, TlvTag};
pub use verify::PairVerify;

use crate::protocol::CodecError;
use crate::protocol::crypto::{CryptoError, derive_key};

/// Two 32-byte symmetric session keys derived after pair-verify.
///
/// Lifetime equals the TCP connection; never persisted.
#[derive(Clone)]
pub struct SessionKeys {
    /// Key encrypting frames we send.
    pub output_key: [u8; 32],
    /// Key decrypting frames the device sends.
    pub input_key: [u8; 32],
}

impl SessionKeys {
    /// Derive the session keys from the pair-verify shared secret.
    pub(crate) fn derive(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            output_key: derive_key(b"", shared_secret, b"ClientEncrypt-main")?,
            input_key: derive_key(b"", shared_secret, b"ServerEncrypt-main")?,
        })
    }
}

/// Peer-reported pairing error kinds (TLV tag 0x07 codes 1..=6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DeviceErrorKind {
    Unknown,
    /// Likely a wrong PIN.
    AuthenticationFailed,
    Backoff,
    UnknownPeer,
    MaxPeers,
    MaxAuthAttempts,
}

impl DeviceErrorKind {
    fn from_code(code: u8) -> Self {
        match code {
            2 => Self::AuthenticationFailed,
            3 => Self::Backoff,
            4 => Self::UnknownPeer,
            5 => Self::MaxPeers,
            6 => Self::MaxAuthAttempts,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown error"),
            Self::AuthenticationFailed => write!(f, "authentication failed (likely wrong PIN)"),
            Self::Backoff => write!(f, "backoff requested"),
            Self::UnknownPeer => write!(f, "unknown peer"),
            Self::MaxPeers => write!(f, "maximum peers reached"),
            Self::MaxAuthAttempts => write!(f, "maximum authentication attempts reached"),
        }
    }
}

/// Pairing errors
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum PairingError {
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("unexpected sequence number: expected {expected}, got {actual}")]
    UnexpectedSeqNo { expected: u8, actual: u8 },

    #[error("missing TLV tag {0:?}")]
    MissingTag(TlvTag),

    #[error("device returned error {code}: {kind}")]
    Device { code: u8, kind: DeviceErrorKind },

    #[error("peer identifier does not match stored credentials")]
    IdentifierMismatch,

    #[error("malformed credential string")]
    InvalidCredentials,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl PairingError {
    pub(crate) fn device(code: u8) -> Self {
        Self::Device {
            code,
            kind: DeviceErrorKind::from_code(code),
        }
    }
}
