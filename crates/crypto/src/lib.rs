//! # Pixur token cryptography
//!
//! Signing primitives and the Pixur web token (PWT) codec.
//!
//! ## Algorithms
//! | Use | Algorithm |
//! |------|------------|
//! | Token MAC | HMAC-SHA-512/256 |
//! | Segment encoding | base64url, no padding |
//! | Login secrets | bcrypt |

pub mod issue;
pub mod pwt;
pub mod validate;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha512_256;

pub use issue::{issue_tokens, IssuedTokens, SignedToken, TokenState, TokenWindows};
pub use pwt::{Clock, PwtCoder, PwtError};
pub use validate::{
    validate_auth_token, validate_pix_token, validate_refresh_token, AuthClaims, RefreshClaims,
};

/// HMAC keyed with SHA-512/256, 32 output bytes.
pub type HmacSha512_256 = Hmac<Sha512_256>;

/// Length of a token signature in bytes.
pub const MAC_LEN: usize = 32;

/// Crypto helper errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The MAC rejected the key
    #[error("invalid HMAC key")]
    InvalidKey,
    /// Input was not base64url without padding
    #[error("base64url decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    /// bcrypt refused to hash the secret
    #[error("secret hashing failed: {0}")]
    SecretHash(#[from] bcrypt::BcryptError),
}

/// Builds a keyed HMAC-SHA-512/256 instance. Clone it per message.
pub fn hmac_sha512_256(key: &[u8]) -> Result<HmacSha512_256, CryptoError> {
    HmacSha512_256::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)
}

/// base64url without padding.
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Inverse of [`b64url_encode`]. Padded input is rejected.
pub fn b64url_decode(text: &[u8]) -> Result<Vec<u8>, CryptoError> {
    Ok(URL_SAFE_NO_PAD.decode(text)?)
}

/// bcrypt work factor for stored login secrets.
pub const SECRET_HASH_COST: u32 = bcrypt::DEFAULT_COST;

/// Salted bcrypt hash of a login secret, in modular crypt format.
pub fn hash_secret(secret: &str) -> Result<String, CryptoError> {
    hash_secret_with_cost(secret, SECRET_HASH_COST)
}

/// [`hash_secret`] with an explicit work factor.
pub fn hash_secret_with_cost(secret: &str, cost: u32) -> Result<String, CryptoError> {
    Ok(bcrypt::hash(secret, cost)?)
}

/// Whether `secret` matches a stored bcrypt hash. A malformed hash never
/// matches.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    bcrypt::verify(secret, hash).unwrap_or(false)
}
