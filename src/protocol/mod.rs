//! Companion wire protocol: codecs and pairing state machines

pub mod crypto;
pub mod opack;
pub mod pairing;
pub mod plist;
pub mod rti;

use thiserror::Error;

/// Errors shared by the OPACK, TLV8 and binary-plist codecs.
///
/// Inputs from the wire are never trusted; every decoder fails closed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the declared value did.
    #[error("truncated input")]
    Truncated,

    /// A tag byte outside the format's tag table.
    #[error("unknown tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// A back-reference to a missing or still-incomplete object.
    #[error("bad back-reference: {0}")]
    BadBackref(usize),

    /// A string value that is not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// A shape the codec does not model (e.g. non-string map key).
    #[error("unsupported value: {0}")]
    Unsupported(&'static str),
}
