//! Pair-verify: per-connection authentication using stored keys
//!
//! Runs on every new Companion connection; authenticates both parties and
//! derives the session AEAD keys without another PIN entry.

use zeroize::Zeroizing;

use super::tlv::{TlvDecoder, TlvEncoder, TlvTag};
use super::{HapCredentials, PairingError, SessionKeys};
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, CryptoError, Ed25519KeyPair, Nonce, X25519KeyPair, derive_key,
    lengths, verify_signature,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    AwaitingSession,
    AwaitingAck,
    Complete,
    Failed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::AwaitingSession => "AwaitingSession",
            Self::AwaitingAck => "AwaitingAck",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }
}

/// Pair-verify session
pub struct PairVerify {
    state: State,
    credentials: HapCredentials,
    ephemeral: X25519KeyPair,
    shared_secret: Option<Zeroizing<[u8; 32]>>,
}

impl PairVerify {
    /// Create a new pair-verify session from stored credentials.
    ///
    /// # Errors
    ///
    /// Returns error if the stored device key is malformed.
    pub fn new(credentials: HapCredentials) -> Result<Self, PairingError> {
        if credentials.ltpk.len() != lengths::ED25519_PUBLIC_KEY {
            return Err(CryptoError::InvalidPublicKey.into());
        }
        Ok(Self {
            state: State::Init,
            credentials,
            ephemeral: X25519KeyPair::generate(),
            shared_secret: None,
        })
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

    /// SeqNo 1: our ephemeral public key.
    ///
    /// # Errors
    ///
    /// Returns error if the machine already advanced.
    pub fn m1(&mut self) -> Result<Vec<u8>, PairingError> {
        self.expect_state(State::Init)?;

        let m1 = TlvEncoder::new()
            .add_seq_no(1)
            .add(TlvTag::PublicKey, &self.ephemeral.public_key())
            .build();

        self.state = State::AwaitingSession;
        Ok(m1)
    }

    /// Process SeqNo 2 (session key + encrypted signature), produce SeqNo 3.
    ///
    /// # Errors
    ///
    /// Returns error on identifier mismatch or signature failure.
    pub fn process_m2(&mut self, data: &[u8]) -> Result<Vec<u8>, PairingError> {
        self.expect_state(State::AwaitingSession)?;

        let tlv = TlvDecoder::decode(data)?;
        self.check_reply(&tlv, 2)?;

        let session_pub = tlv.get_required(TlvTag::PublicKey)?.to_vec();
        let encrypted = tlv.get_required(TlvTag::EncryptedData)?;

        let shared = self.ephemeral.shared_secret(&session_pub)?;
        let verify_key = derive_key(
            b"Pair-Verify-Encrypt-Salt",
            &shared[..],
            b"Pair-Verify-Encrypt-Info",
        )?;

        let cipher = ChaCha20Poly1305Cipher::from_key(&verify_key);
        let decrypted = cipher.open(&Nonce::from_label(b"PV-Msg02"), &[], encrypted)?;

        let inner = TlvDecoder::decode(&decrypted)?;
        let identifier = inner.get_required(TlvTag::Identifier)?;
        let signature = inner.get_required(TlvTag::Signature)?;

        if identifier != self.credentials.atv_id {
            self.state = State::Failed;
            return Err(PairingError::IdentifierMismatch);
        }

        // session_pub ‖ atv_id ‖ verify_pub, signed with the device's
        // long-term key from setup.
        let verify_pub = self.ephemeral.public_key();
        let mut signed_data = Vec::new();
        signed_data.extend_from_slice(&session_pub);
        signed_data.extend_from_slice(identifier);
        signed_data.extend_from_slice(&verify_pub);
        verify_signature(&self.credentials.ltpk, &signed_data, signature)?;

        // Our turn: verify_pub ‖ client_id ‖ session_pub.
        let mut device_info = Vec::new();
        device_info.extend_from_slice(&verify_pub);
        device_info.extend_from_slice(&self.credentials.client_id);
        device_info.extend_from_slice(&session_pub);

        let our_keypair = Ed25519KeyPair::from_seed(&self.credentials.ltsk)?;
        let our_signature = our_keypair.sign(&device_info);

        let inner = TlvEncoder::new()
            .add(TlvTag::Identifier, &self.credentials.client_id)
            .add(TlvTag::Signature, &our_signature)
            .build();

        let encrypted = cipher.seal(&Nonce::from_label(b"PV-Msg03"), &[], &inner)?;

        let m3 = TlvEncoder::new()
            .add_seq_no(3)
            .add(TlvTag::EncryptedData, &encrypted)
            .build();

        self.shared_secret = Some(shared);
        self.state = State::AwaitingAck;
        Ok(m3)
    }

    /// Process SeqNo 4 and derive the session keys.
    ///
    /// # Errors
    ///
    /// Returns error on peer error or out-of-order message.
    pub fn process_m4(&mut self, data: &[u8]) -> Result<SessionKeys, PairingError> {
        self.expect_state(State::AwaitingAck)?;

        let tlv = TlvDecoder::decode(data)?;
        self.check_reply(&tlv, 4)?;

        let shared = self
            .shared_secret
            .as_ref()
            .ok_or(PairingError::InvalidState {
                expected: "shared secret",
                actual: "none",
            })?;

        self.state = State::Complete;
        Ok(SessionKeys::derive(&shared[..])?)
    }
}
