//! HAP pairing over the framed Companion transport
//!
//! The same TLV state machines as the HTTP carrier, wrapped in OPACK maps
//! under `_pd` and exchanged through the router's auth path.

use std::sync::Arc;

use crate::connection::{FrameType, Router};
use crate::error::CompanionError;
use crate::opack_dict;
use crate::protocol::opack::Value;
use crate::protocol::pairing::{HapCredentials, PairSetup, PairVerify, SessionKeys};

/// Password type marker for PIN pairing.
const PAIRING_TYPE_PIN: u64 = 1;

fn setup_envelope(tlv: Vec<u8>) -> Value {
    opack_dict! {
        "_pd" => tlv,
        "_pwTy" => PAIRING_TYPE_PIN,
    }
}

fn verify_envelope(tlv: Vec<u8>) -> Value {
    opack_dict! { "_pd" => tlv }
}

fn unwrap_envelope(reply: &Value) -> Result<Vec<u8>, CompanionError> {
    reply
        .get("_pd")
        .and_then(Value::as_bytes)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| CompanionError::Protocol("pairing reply without _pd".into()))
}

/// Carrier-side state for an in-progress PIN pairing.
pub(crate) struct SetupExchange {
    router: Arc<Router>,
    setup: PairSetup,
}

impl SetupExchange {
    /// Begin pairing: sends SeqNo 1, which makes the device show its PIN.
    ///
    /// # Errors
    ///
    /// Returns error if the exchange fails.
    pub async fn start(
        router: Arc<Router>,
        device_name: &str,
    ) -> Result<(Self, Vec<u8>), CompanionError> {
        let mut setup = PairSetup::new(device_name);
        let m1 = setup.m1()?;

        let reply = router
            .exchange_auth(FrameType::PsStart, &setup_envelope(m1))
            .await?;
        let m2 = unwrap_envelope(&reply)?;

        Ok((Self { router, setup }, m2))
    }

    /// Finish pairing with the PIN the device is showing.
    ///
    /// # Errors
    ///
    /// Returns error on a wrong PIN or peer-reported failure.
    pub async fn finish(mut self, pin: &str, m2: &[u8]) -> Result<HapCredentials, CompanionError> {
        let m3 = self.setup.process_m2(pin, m2)?;
        let reply = self
            .router
            .exchange_auth(FrameType::PsNext, &setup_envelope(m3))
            .await?;
        let m4 = unwrap_envelope(&reply)?;

        let m5 = self.setup.process_m4(&m4)?;
        let reply = self
            .router
            .exchange_auth(FrameType::PsNext, &setup_envelope(m5))
            .await?;
        let m6 = unwrap_envelope(&reply)?;

        Ok(self.setup.process_m6(&m6)?)
    }
}

/// Run pair-verify over the framed transport, yielding the session keys.
///
/// # Errors
///
/// Returns error on signature failure, identifier mismatch, or transport
/// trouble.
pub async fn pair_verify(
    router: &Router,
    credentials: HapCredentials,
) -> Result<SessionKeys, CompanionError> {
    let mut verify = PairVerify::new(credentials)?;

    let m1 = verify.m1()?;
    let reply = router
        .exchange_auth(FrameType::PvStart, &verify_envelope(m1))
        .await?;
    let m2 = unwrap_envelope(&reply)?;

    let m3 = verify.process_m2(&m2)?;
    let reply = router
        .exchange_auth(FrameType::PvNext, &verify_envelope(m3))
        .await?;
    let m4 = unwrap_envelope(&reply)?;

    Ok(verify.process_m4(&m4)?)
}
