//! Framed Companion transport and message dispatch

pub mod cache;
pub mod router;
pub mod transport;


pub use cache::ConnectionCache;
pub use router::Router;
pub use transport::{Connection, FrameListener, NullListener};

/// Companion frame types: the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum FrameType {
    Unknown = 0,
    NoOp = 1,
    PsStart = 3,
    PsNext = 4,
    PvStart = 5,
    PvNext = 6,
    UOpack = 7,
    EOpack = 8,
    POpack = 9,
    PaReq = 10,
    PaRsp = 11,
    SessionStartRequest = 16,
    SessionStartResponse = 17,
    SessionData = 18,
    FamilyIdentityRequest = 32,
    FamilyIdentityResponse = 33,
    FamilyIdentityUpdate = 34,
}

impl FrameType {
    /// Parse a frame type byte.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Unknown),
            1 => Some(Self::NoOp),
            3 => Some(Self::PsStart),
            4 => Some(Self::PsNext),
            5 => Some(Self::PvStart),
            6 => Some(Self::PvNext),
            7 => Some(Self::UOpack),
            8 => Some(Self::EOpack),
            9 => Some(Self::POpack),
            10 => Some(Self::PaReq),
            11 => Some(Self::PaRsp),
            16 => Some(Self::SessionStartRequest),
            17 => Some(Self::SessionStartResponse),
            18 => Some(Self::SessionData),
            32 => Some(Self::FamilyIdentityRequest),
            33 => Some(Self::FamilyIdentityResponse),
            34 => Some(Self::FamilyIdentityUpdate),
            _ => None,
        }
    }

    /// The frame type a device answers this request with.
    ///
    /// A `*_Start` request is replied with `*_Next`; a `*_Next` request is
    /// replied with `*_Next`.
    #[must_use]
    pub fn expected_reply(self) -> Option<Self> {
        match self {
            Self::PsStart | Self::PsNext => Some(Self::PsNext),
            Self::PvStart | Self::PvNext => Some(Self::PvNext),
            _ => None,
        }
    }

    /// Whether this frame carries a pair-setup or pair-verify payload.
    #[must_use]
    pub fn is_auth(self) -> bool {
        matches!(
            self,
            Self::PsStart | Self::PsNext | Self::PvStart | Self::PvNext
        )
    }

    /// Whether this frame carries an OPACK message map.
    #[must_use]
    pub fn is_opack_message(self) -> bool {
        matches!(self, Self::UOpack | Self::EOpack | Self::POpack)
    }
}

/// One unit of the Companion transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type byte.
    pub frame_type: FrameType,
    /// Decrypted payload.
    pub payload: Vec<u8>,
}

/// OPACK message type discriminants carried in `_t`.
pub mod message_type {
    /// Unsolicited event.
    pub const EVENT: u64 = 1;
    /// Request awaiting a response.
    pub const REQUEST: u64 = 2;
    /// Response to a request.
    pub const RESPONSE: u64 = 3;
}
