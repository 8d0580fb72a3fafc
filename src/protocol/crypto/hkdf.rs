use hkdf::Hkdf;
use sha2::Sha512;

use super::CryptoError;

/// One-shot HKDF-SHA512 expansion to a 32-byte key.
///
/// Every key the pairing suite derives is 32 bytes, so the salt/info pair
/// is the whole recipe. An empty salt behaves like an absent one.
pub fn derive_key(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut okm = [0u8; 32];
    Hkdf::<Sha512>::new(Some(salt), ikm)
        .expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(okm)
}
