//! # Pixur shared types
//!
//! Data definitions shared by the token codec, the media pipeline, the HTTP
//! gateway and the CLI.
//!
//! ## Encoding rules
//! - Varint: every public identifier (see [`varint`])
//! - base64url without padding: token segments
//! - JSON: HTTP API bodies

pub mod pix;
pub mod pwt;
pub mod varint;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use pix::{pic_path, pic_relative_url, thumbnail_path, thumbnail_relative_url, PixFileName};
pub use pwt::{PwtAlgorithm, PwtHeader, PwtPayload, PwtPayloadView, Timestamp, TokenType};
pub use varint::{UserEventId, Varint, VarintError};

// ---------------------------------------------------------------------------
// Error categories
// ---------------------------------------------------------------------------

/// Coarse failure classes shared by every core error type. Handlers decide
/// the outward status from the category alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad varint, bad base64url, wrong segment count, unrecognised container
    MalformedInput,
    /// Well formed, but an unrecognised algorithm, version or codec
    Unsupported,
    /// HMAC mismatch
    IntegrityFailure,
    /// Clock-based rejection, including not-yet-valid
    Expired,
    /// Subprocess, pipe or upstream read failure
    ResourceFailure,
    /// Probe result rejected on content
    ProducerRejected,
}

// ---------------------------------------------------------------------------
// Request metadata names
// ---------------------------------------------------------------------------

/// Header carrying the auth token.
pub const AUTH_TOKEN_HEADER: &str = "pixur-auth-token";

/// Header carrying the pix token for non-browser clients.
pub const PIX_TOKEN_HEADER: &str = "pixur-pix-token";

/// Header carrying pass-through HTTP metadata.
pub const HTTP_HEADER_KEY: &str = "pixur-http-header";

/// Default cookie carrying the pix token.
pub const DEFAULT_PIX_TOKEN_COOKIE: &str = "pix_token";

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// What a user may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Upload pics
    PicCreate,
    /// Browse the pic index
    PicIndex,
    /// Read pixel data
    PicRead,
    /// Modify pic metadata
    PicUpdateViewCounter,
    /// Soft or hard delete pics
    PicSoftDelete,
    /// Add tags
    PicTagCreate,
    /// Comment on pics
    PicCommentCreate,
    /// Vote on pics
    PicVoteCreate,
    /// Create accounts
    UserCreate,
    /// Change other users' capabilities
    UserUpdateCapability,
}

/// A set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `cap` is in the set.
    pub fn has(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    /// Adds `cap`.
    pub fn insert(&mut self, cap: Capability) {
        self.0.insert(cap);
    }

    /// Iterates in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        CapabilitySet(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// HTTP API bodies
// ---------------------------------------------------------------------------

/// `POST /api/getRefreshToken` request. Exactly one way of identifying is
/// expected: ident and secret, a refresh token, or a previous auth token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRefreshTokenRequest {
    /// Login name
    #[serde(default)]
    pub ident: String,
    /// Login secret
    #[serde(default)]
    pub secret: String,
    /// A live refresh token
    #[serde(default)]
    pub refresh_token: String,
    /// An auth token from the family being rotated
    #[serde(default)]
    pub previous_auth_token: String,
}

/// `POST /api/getRefreshToken` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRefreshTokenResponse {
    /// New refresh token
    pub refresh_token: String,
    /// New auth token
    pub auth_token: String,
    /// New pix token, absent without `PIC_READ`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pix_token: Option<String>,
    /// Decoded refresh payload
    pub refresh_payload: PwtPayloadView,
    /// Decoded auth payload
    pub auth_payload: PwtPayloadView,
    /// Decoded pix payload
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pix_payload: Option<PwtPayloadView>,
}

/// `POST /api/deleteToken` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteTokenResponse {}

/// Error body returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Status code name, e.g. `unauthenticated`
    pub code: String,
    /// Human readable message
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set_json() {
        let caps: CapabilitySet = [Capability::PicRead, Capability::PicIndex]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&caps).unwrap();
        assert_eq!(json, r#"["PIC_INDEX","PIC_READ"]"#);

        let back: CapabilitySet = serde_json::from_str(&json).unwrap();
        assert!(back.has(Capability::PicRead));
        assert!(!back.has(Capability::UserCreate));
    }

    #[test]
    fn test_refresh_request_defaults() {
        let req: GetRefreshTokenRequest =
            serde_json::from_str(r#"{"ident":"alice","secret":"pw"}"#).unwrap();
        assert_eq!(req.ident, "alice");
        assert!(req.refresh_token.is_empty());
        assert!(req.previous_auth_token.is_empty());
    }
}
