use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::CryptoError;

/// Ephemeral X25519 key pair for one pair-verify exchange.
pub struct X25519KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519KeyPair {
    /// Generate a fresh ephemeral pair.
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key bytes as they go on the wire.
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// ECDH against a peer public key taken straight off the wire.
    ///
    /// The shared secret is wiped when dropped.
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}
