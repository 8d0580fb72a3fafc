use super::{CryptoError, lengths};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

/// RFC 5054 3072-bit group prime, g = 5.
const N_HEX: &[u8] = b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
      8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
      302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
      A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
      49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
      FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
      670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
      180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
      3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D\
      04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D\
      B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226\
      1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
      BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC\
      E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

fn pad_to_group(bytes: &[u8]) -> Vec<u8> {
    let mut padded = vec![0u8; lengths::SRP_GROUP];
    padded[lengths::SRP_GROUP - bytes.len()..].copy_from_slice(bytes);
    padded
}

/// SRP-6a client (3072-bit group, SHA-512) with a caller-supplied private
/// exponent.
///
/// The Companion peer expects the client's `a` to be the same 32 bytes as
/// the freshly generated Ed25519 identity seed, so unlike a conventional
/// SRP client this one does not draw its own randomness.
pub struct SrpClient {
    n: BigUint,
    g: BigUint,
    k: BigUint,
    a: BigUint,
    public_key: Vec<u8>,
}

impl SrpClient {
    /// Create a client from the private exponent bytes (interpreted
    /// big-endian).
    pub fn new(private_exponent: &[u8]) -> Result<Self, CryptoError> {
        let n = BigUint::parse_bytes(N_HEX, 16)
            .ok_or_else(|| CryptoError::SrpError("failed to parse N".to_string()))?;
        let g = BigUint::from(5u32);

        // k = H(N, pad(g))
        let k = {
            let mut hasher = Sha512::new();
            hasher.update(n.to_bytes_be());
            hasher.update(pad_to_group(&g.to_bytes_be()));
            BigUint::from_bytes_be(&hasher.finalize())
        };

        let a = BigUint::from_bytes_be(private_exponent) % &n;
        if a.is_zero() {
            return Err(CryptoError::SrpError("private exponent is zero".to_string()));
        }

        // A = g^a % n, sent padded to the group size
        let a_pub = g.modpow(&a, &n);
        let public_key = pad_to_group(&a_pub.to_bytes_be());

        Ok(Self {
            n,
            g,
            k,
            a,
            public_key,
        })
    }

    /// The padded public key `A` to send to the server.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Process the server challenge (salt + `B`) and derive the session
    /// key and client proof.
    pub fn process_challenge(
        &self,
        username: &[u8],
        password: &[u8],
        salt: &[u8],
        server_public: &[u8],
    ) -> Result<SrpVerifier, CryptoError> {
        if server_public.len() > lengths::SRP_GROUP {
            return Err(CryptoError::SrpError(
                "server public key exceeds group size".to_string(),
            ));
        }
        let b_pub = BigUint::from_bytes_be(server_public);
        if (&b_pub % &self.n).is_zero() {
            return Err(CryptoError::SrpError(
                "invalid server public key".to_string(),
            ));
        }

        // u = H(pad(A), pad(B))
        let u = {
            let mut hasher = Sha512::new();
            hasher.update(&self.public_key);
            hasher.update(pad_to_group(&b_pub.to_bytes_be()));
            BigUint::from_bytes_be(&hasher.finalize())
        };

        // x = H(salt, H(username, ":", password))
        let x = {
            let mut inner = Sha512::new();
            inner.update(username);
            inner.update(b":");
            inner.update(password);
            let h_up = inner.finalize();

            let mut outer = Sha512::new();
            outer.update(salt);
            outer.update(h_up);
            BigUint::from_bytes_be(&outer.finalize())
        };

        // S = (B - k * g^x) ^ (a + u * x) % n
        // BigUint has no negative values, so fold B into the group first.
        let g_x = self.g.modpow(&x, &self.n);
        let k_g_x = (&self.k * g_x) % &self.n;
        let b_mod = &b_pub % &self.n;
        let base = if b_mod >= k_g_x {
            (&b_mod - &k_g_x) % &self.n
        } else {
            (&self.n - (&k_g_x - &b_mod)) % &self.n
        };

        let exp = &self.a + (&u * x);
        let s_shared = base.modpow(&exp, &self.n);

        // K = H(S)
        let session_key = Sha512::digest(s_shared.to_bytes_be()).to_vec();

        // M1 = H(H(N) ^ H(g), H(username), salt, A, B, K)
        let client_proof = {
            let hn = Sha512::digest(self.n.to_bytes_be());
            let hg = Sha512::digest(self.g.to_bytes_be());
            let mut hn_xor_hg = [0u8; 64];
            for i in 0..64 {
                hn_xor_hg[i] = hn[i] ^ hg[i];
            }

            let mut hasher = Sha512::new();
            hasher.update(hn_xor_hg);
            hasher.update(Sha512::digest(username));
            hasher.update(salt);
            hasher.update(&self.public_key);
            hasher.update(server_public);
            hasher.update(&session_key);
            hasher.finalize().to_vec()
        };

        Ok(SrpVerifier {
            a_pub: self.public_key.clone(),
            client_proof,
            session_key,
        })
    }
}

/// Holds the derived session key until the server proof checks out.
pub struct SrpVerifier {
    a_pub: Vec<u8>,
    client_proof: Vec<u8>,
    session_key: Vec<u8>,
}

impl SrpVerifier {
    /// The client proof `M1` to send in SeqNo 3.
    pub fn client_proof(&self) -> &[u8] {
        &self.client_proof
    }

    /// Verify the server proof `M2 = H(A, M1, K)` and release the session
    /// key.
    pub fn verify_server(&self, server_proof: &[u8]) -> Result<&[u8], CryptoError> {
        let mut hasher = Sha512::new();
        hasher.update(&self.a_pub);
        hasher.update(&self.client_proof);
        hasher.update(&self.session_key);
        let expected = hasher.finalize();

        if expected.as_slice() != server_proof {
            return Err(CryptoError::SrpError(
                "server proof verification failed".to_string(),
            ));
        }

        Ok(&self.session_key)
    }
}

impl Drop for SrpVerifier {
    fn drop(&mut self) {
        self.session_key.zeroize();
    }
}
