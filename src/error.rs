//! Error types

use crate::connection::FrameType;
use crate::protocol::CodecError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::pairing::PairingError;
use crate::storage::StorageError;

/// Main error type for Companion operations.
#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    /// Malformed OPACK/TLV8/bplist input.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// ECDH/signature/AEAD failure; pairing aborts.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Pairing state machine or peer-reported pairing error.
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Deadline expired awaiting a reply.
    #[error("timed out waiting for {operation}")]
    Timeout {
        /// Operation description, e.g. `response to _x=17` or `PV_Next frame`.
        operation: String,
    },

    /// The connection closed while an operation was pending.
    #[error("connection lost")]
    ConnectionLost,

    /// Unexpected reply shape from the peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// mDNS discovery failure.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Credential storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CompanionError {
    pub(crate) fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub(crate) fn frame_timeout(frame_type: FrameType) -> Self {
        Self::Timeout {
            operation: format!("{frame_type:?} frame"),
        }
    }
}

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No connection is established.
    #[error("not connected")]
    NotConnected,

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// Frame payload exceeds the 24-bit length field.
    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),
}
