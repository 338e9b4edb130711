//! Client side of the SRP-6a password verifier handshake used by Cognito
//! user pools (`USER_SRP_AUTH` followed by a `PASSWORD_VERIFIER` challenge).
//!
//! All hashes are SHA-256 over the big-endian "padded" encoding of each
//! integer: its minimal bytes, with a leading zero byte added whenever the
//! top bit is set, so every value reads as non-negative.

use std::sync::OnceLock;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The 3072-bit group from RFC 5054, as used by Cognito.
const N_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

const GENERATOR: u32 = 2;

/// Info string for the HKDF step, followed by the counter byte 0x01.
const DERIVED_KEY_INFO: &[u8] = b"Caldera Derived Key";

/// Length of the secret ephemeral value `a`, in bytes.
const EPHEMERAL_BYTES: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SrpError {
    #[error("Server sent an invalid SRP value: {0}")]
    InvalidServerValue(&'static str),

    #[error("Server sent malformed challenge parameter {0}")]
    Malformed(&'static str),
}

/// Server parameters of a `PASSWORD_VERIFIER` challenge.
#[derive(Debug, Clone)]
pub struct VerifierChallenge {
    /// `USER_ID_FOR_SRP`
    pub user_id: String,
    /// `SALT`, hex
    pub salt_hex: String,
    /// `SRP_B`, hex
    pub server_b_hex: String,
    /// `SECRET_BLOCK`, base64
    pub secret_block: String,
}

/// Values to send back in `RespondToAuthChallenge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub timestamp: String,
    pub signature: String,
}

/// The group modulus N, parsed once.
fn modulus() -> &'static BigUint {
    static N: OnceLock<BigUint> = OnceLock::new();
    N.get_or_init(|| {
        // N_HEX is a constant string of hex digits; a parse failure is a typo in it
        BigUint::parse_bytes(N_HEX.as_bytes(), 16).expect("N_HEX is valid hex")
    })
}

/// Big-endian bytes of `n`, with a leading zero when the top bit is set.
pub(crate) fn padded_bytes(n: &BigUint) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    match bytes.first() {
        Some(&b) if b & 0x80 != 0 => {
            let mut padded = Vec::with_capacity(bytes.len() + 1);
            padded.push(0);
            padded.extend_from_slice(&bytes);
            padded
        }
        _ => bytes,
    }
}

fn sha256(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

fn hash_to_int(parts: &[&[u8]]) -> BigUint {
    BigUint::from_bytes_be(&sha256(parts))
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    // HMAC hashes or pads keys of any length, so InvalidLength never occurs
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC-SHA256 accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

fn parse_hex(value: &str, name: &'static str) -> Result<BigUint, SrpError> {
    BigUint::parse_bytes(value.trim().as_bytes(), 16).ok_or(SrpError::Malformed(name))
}

/// Cognito's timestamp format: `Tue Mar 5 09:04:01 UTC 2024` (day not padded).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%a %b %-d %H:%M:%S UTC %Y").to_string()
}

/// One client-side SRP session: a fresh secret `a` and its public `A`.
pub struct SrpSession {
    n: BigUint,
    g: BigUint,
    k: BigUint,
    a: BigUint,
    big_a: BigUint,
    pool_name: String,
}

impl SrpSession {
    pub fn new(pool_name: &str) -> Self {
        loop {
            let mut bytes = [0u8; EPHEMERAL_BYTES];
            rand::thread_rng().fill_bytes(&mut bytes);
            if let Some(session) = Self::with_secret(pool_name, BigUint::from_bytes_be(&bytes)) {
                return session;
            }
        }
    }

    /// Build a session from a known secret. Returns `None` when `A mod N`
    /// would be zero, which the protocol forbids.
    pub(crate) fn with_secret(pool_name: &str, a: BigUint) -> Option<Self> {
        let n = modulus().clone();
        let g = BigUint::from(GENERATOR);
        let k = hash_to_int(&[&padded_bytes(&n), &padded_bytes(&g)]);
        let big_a = g.modpow(&a, &n);
        if big_a == BigUint::default() {
            return None;
        }
        Some(Self {
            n,
            g,
            k,
            a,
            big_a,
            pool_name: pool_name.to_string(),
        })
    }

    /// `SRP_A` for `InitiateAuth`, lowercase hex.
    pub fn public_a_hex(&self) -> String {
        self.big_a.to_str_radix(16)
    }

    pub(crate) fn public_a(&self) -> &BigUint {
        &self.big_a
    }

    /// `x = H(salt | H(poolName | userId | ":" | password))`
    fn private_key(&self, user_id: &str, password: &str, salt: &BigUint) -> BigUint {
        let identity = sha256(&[
            self.pool_name.as_bytes(),
            user_id.as_bytes(),
            b":",
            password.as_bytes(),
        ]);
        hash_to_int(&[&padded_bytes(salt), &identity])
    }

    /// Shared premaster secret `S` and scrambler `u` for a server `B`.
    fn shared_secret(
        &self,
        user_id: &str,
        password: &str,
        salt: &BigUint,
        big_b: &BigUint,
    ) -> Result<(BigUint, BigUint), SrpError> {
        let zero = BigUint::default();
        if big_b % &self.n == zero {
            return Err(SrpError::InvalidServerValue("SRP_B"));
        }

        let u = hash_to_int(&[&padded_bytes(&self.big_a), &padded_bytes(big_b)]);
        if u == zero {
            return Err(SrpError::InvalidServerValue("u"));
        }

        let x = self.private_key(user_id, password, salt);
        let g_x = self.g.modpow(&x, &self.n);
        let k_g_x = (&self.k * g_x) % &self.n;
        // (B - k·g^x) mod N, kept non-negative
        let base = ((big_b % &self.n) + &self.n - k_g_x) % &self.n;
        let exponent = &self.a + &u * &x;
        Ok((base.modpow(&exponent, &self.n), u))
    }

    /// 16-byte HKDF-SHA256 key from `S` (input key material) and `u` (salt).
    fn derive_key(secret: &BigUint, u: &BigUint) -> Vec<u8> {
        let prk = hmac_sha256(&padded_bytes(u), &[&padded_bytes(secret)]);
        let mut okm = hmac_sha256(&prk, &[DERIVED_KEY_INFO, &[1u8]]);
        okm.truncate(16);
        okm
    }

    /// Compute the password claim for a verifier challenge at `now`.
    pub fn respond(
        &self,
        challenge: &VerifierChallenge,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<ChallengeResponse, SrpError> {
        let salt = parse_hex(&challenge.salt_hex, "SALT")?;
        let big_b = parse_hex(&challenge.server_b_hex, "SRP_B")?;
        let secret_block = base64::engine::general_purpose::STANDARD
            .decode(challenge.secret_block.trim())
            .map_err(|_| SrpError::Malformed("SECRET_BLOCK"))?;

        let (secret, u) = self.shared_secret(&challenge.user_id, password, &salt, &big_b)?;
        let key = Self::derive_key(&secret, &u);

        let timestamp = format_timestamp(now);
        let signature = hmac_sha256(
            &key,
            &[
                self.pool_name.as_bytes(),
                challenge.user_id.as_bytes(),
                &secret_block,
                timestamp.as_bytes(),
            ],
        );

        Ok(ChallengeResponse {
            timestamp,
            signature: base64::engine::general_purpose::STANDARD.encode(signature),
        })
    }
}
