//! Pair-setup: PIN-based pairing using SRP-6a
//!
//! Produces the long-term [`HapCredentials`] for a device. The user must
//! enter the PIN displayed on screen. Carrier-agnostic: the same machine
//! is driven over `AirPlay` HTTP and over the framed Companion transport.

use super::credentials::generate_client_id;
use super::tlv::{TlvDecoder, TlvEncoder, TlvTag, methods};
use super::{HapCredentials, PairingError};
use crate::opack_dict;
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, Nonce, SrpClient, SrpVerifier, derive_key,
};
use crate::protocol::opack;

const SRP_USERNAME: &[u8] = b"Pair-Setup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    AwaitingSalt,
    AwaitingProof,
    AwaitingDeviceInfo,
    Complete,
    Failed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::AwaitingSalt => "AwaitingSalt",
            Self::AwaitingProof => "AwaitingProof",
            Self::AwaitingDeviceInfo => "AwaitingDeviceInfo",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }
}

/// Pair-setup session
pub struct PairSetup {
    state: State,
    /// Long-term identity; its seed doubles as the SRP private exponent.
    signing_keypair: Ed25519KeyPair,
    /// Our identifier: a freshly generated UUID in text form.
    client_id: Vec<u8>,
    /// Name sent to the device in SeqNo 5.
    display_name: String,
    srp_verifier: Option<SrpVerifier>,
    session_key: Option<Vec<u8>>,
}

impl PairSetup {
    /// Create a new pair-setup session.
    #[must_use]
    pub fn new(display_name: &str) -> Self {
        Self {
            state: State::Init,
            signing_keypair: Ed25519KeyPair::generate(),
            client_id: generate_client_id(),
            display_name: display_name.to_string(),
            srp_verifier: None,
            session_key: None,
        }
    }

    fn expect_state(&self, expected: State) -> Result<(), PairingError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PairingError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    fn check_reply(&mut self, tlv: &TlvDecoder, seq_no: u8) -> Result<(), PairingError> {
        if let Some(code) = tlv.error_code() {
            self.state = State::Failed;
            return Err(PairingError::device(code));
        }
        let actual = tlv.seq_no()?;
        if actual != seq_no {
            return Err(PairingError::UnexpectedSeqNo {
                expected: seq_no,
                actual,
            });
        }
        Ok(())
    }

    /// SeqNo 1: method + sequence number.
    ///
    /// # Errors
    ///
    /// Returns error if the machine already advanced.
    pub fn m1(&mut self) -> Result<Vec<u8>, PairingError> {
        self.expect_state(State::Init)?;

        let m1 = TlvEncoder::new()
            .add_byte(TlvTag::Method, methods::PAIR_SETUP)
            .add_seq_no(1)
            .build();

        self.state = State::AwaitingSalt;
        Ok(m1)
    }

    /// Process SeqNo 2 (salt + server public key) and produce SeqNo 3.
    ///
    /// # Errors
    ///
    /// Returns error on peer error, bad TLV or SRP failure.
    pub fn process_m2(&mut self, pin: &str, data: &[u8]) -> Result<Vec<u8>, PairingError> {
        self.expect_state(State::AwaitingSalt)?;

        let tlv = TlvDecoder::decode(data)?;
        self.check_reply(&tlv, 2)?;

        let salt = tlv.get_required(TlvTag::Salt)?;
        let server_public = tlv.get_required(TlvTag::PublicKey)?;

        // The SRP private exponent is deliberately the Ed25519 seed; the
        // peer expects this reuse.
        let srp = SrpClient::new(&self.signing_keypair.seed())?;
        tracing::debug!(salt_len = salt.len(), "processing pair-setup challenge");

        let verifier = srp.process_challenge(SRP_USERNAME, pin.as_bytes(), salt, server_public)?;

        let m3 = TlvEncoder::new()
            .add_seq_no(3)
            .add(TlvTag::PublicKey, srp.public_key())
            .add(TlvTag::Proof, verifier.client_proof())
            .build();

        self.srp_verifier = Some(verifier);
        self.state = State::AwaitingProof;
        Ok(m3)
    }

    /// Process SeqNo 4 (server proof) and produce SeqNo 5.
    ///
    /// # Errors
    ///
    /// Returns error on peer error or a server proof mismatch.
    pub fn process_m4(&mut self, data: &[u8]) -> Result<Vec<u8>, PairingError> {
        self.expect_state(State::AwaitingProof)?;

        let tlv = TlvDecoder::decode(data)?;
        self.check_reply(&tlv, 4)?;

        let server_proof = tlv.get_required(TlvTag::Proof)?;
        let verifier = self
            .srp_verifier
            .as_ref()
            .ok_or(PairingError::InvalidState {
                expected: "srp verifier",
                actual: "none",
            })?;
        let session_key = verifier.verify_server(server_proof)?.to_vec();

        let encrypt_key = derive_key(
            b"Pair-Setup-Encrypt-Salt",
            &session_key,
            b"Pair-Setup-Encrypt-Info",
        )?;
        let device_x = derive_key(
            b"Pair-Setup-Controller-Sign-Salt",
            &session_key,
            b"Pair-Setup-Controller-Sign-Info",
        )?;

        let auth_public = self.signing_keypair.public_key();

        let mut sign_data =
            Vec::with_capacity(device_x.len() + self.client_id.len() + auth_public.len());
        sign_data.extend_from_slice(&device_x);
        sign_data.extend_from_slice(&self.client_id);
        sign_data.extend_from_slice(&auth_public);
        let signature = self.signing_keypair.sign(&sign_data);

        let name = opack::pack(&opack_dict! { "name" => self.display_name.as_str() });

        let inner = TlvEncoder::new()
            .add(TlvTag::Identifier, &self.client_id)
            .add(TlvTag::PublicKey, &auth_public)
            .add(TlvTag::Signature, &signature)
            .add(TlvTag::Name, &name)
            .build();

        let cipher = ChaCha20Poly1305Cipher::from_key(&encrypt_key);
        let encrypted = cipher.seal(&Nonce::from_label(b"PS-Msg05"), &[], &inner)?;

        let m5 = TlvEncoder::new()
            .add_seq_no(5)
            .add(TlvTag::EncryptedData, &encrypted)
            .build();

        self.session_key = Some(session_key);
        self.state = State::AwaitingDeviceInfo;
        Ok(m5)
    }

    /// Process SeqNo 6 (device identity) and complete pairing.
    ///
    /// # Errors
    ///
    /// Returns error on peer error or decryption failure.
    pub fn process_m6(&mut self, data: &[u8]) -> Result<HapCredentials, PairingError> {
        self.expect_state(State::AwaitingDeviceInfo)?;

        let tlv = TlvDecoder::decode(data)?;
        self.check_reply(&tlv, 6)?;

        let encrypted = tlv.get_required(TlvTag::EncryptedData)?;
        let session_key = self
            .session_key
            .as_ref()
            .ok_or(PairingError::InvalidState {
                expected: "session key",
                actual: "none",
            })?;

        let decrypt_key = derive_key(
            b"Pair-Setup-Encrypt-Salt",
            session_key,
            b"Pair-Setup-Encrypt-Info",
        )?;

        let cipher = ChaCha20Poly1305Cipher::from_key(&decrypt_key);
        let decrypted = cipher.open(&Nonce::from_label(b"PS-Msg06"), &[], encrypted)?;

        let device_tlv = TlvDecoder::decode(&decrypted)?;
        let atv_id = device_tlv.get_required(TlvTag::Identifier)?.to_vec();
        let ltpk = device_tlv.get_required(TlvTag::PublicKey)?.to_vec();

        self.state = State::Complete;
        tracing::debug!(atv_id_len = atv_id.len(), "pair-setup complete");

        Ok(HapCredentials {
            ltpk,
            ltsk: self.signing_keypair.seed().to_vec(),
            atv_id,
            client_id: self.client_id.clone(),
        })
    }
}
