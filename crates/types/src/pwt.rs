//! # Token wire records
//!
//! Protocol Buffer messages carried inside a Pixur web token. The field
//! numbers are part of the wire format and must not change.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Signature algorithm named in the token header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PwtAlgorithm {
    /// Not set; always rejected
    Unknown = 0,
    /// HMAC with SHA-512/256
    Hs512_256 = 1,
}

/// Token header.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PwtHeader {
    /// One of [`PwtAlgorithm`]
    #[prost(enumeration = "PwtAlgorithm", tag = "1")]
    pub algorithm: i32,
    /// Format version; only 0 exists
    #[prost(int64, tag = "2")]
    pub version: i64,
}

/// Seconds and nanoseconds since the Unix epoch. Wire compatible with
/// `google.protobuf.Timestamp`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, prost::Message)]
pub struct Timestamp {
    /// Whole seconds since the epoch
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    /// Sub-second part, `0..1_000_000_000`
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    /// `0001-01-01T00:00:00Z`, the earliest well-known timestamp.
    pub const MIN_SECONDS: i64 = -62_135_596_800;
    /// `9999-12-31T23:59:59Z`, the latest well-known timestamp.
    pub const MAX_SECONDS: i64 = 253_402_300_799;

    /// Whether the value is inside the well-known timestamp range with
    /// normalised nanos.
    pub fn is_valid(self) -> bool {
        (Self::MIN_SECONDS..=Self::MAX_SECONDS).contains(&self.seconds)
            && (0..1_000_000_000).contains(&self.nanos)
    }

    /// Whole-second timestamp.
    pub fn from_unix_secs(seconds: i64) -> Self {
        Timestamp { seconds, nanos: 0 }
    }

    /// Converts a wall-clock time, keeping nanosecond precision.
    pub fn from_system_time(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp {
                seconds: d.as_secs() as i64,
                nanos: d.subsec_nanos() as i32,
            },
            Err(e) => {
                let d = e.duration();
                let mut seconds = -(d.as_secs() as i64);
                let mut nanos = d.subsec_nanos() as i32;
                if nanos > 0 {
                    seconds -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                Timestamp { seconds, nanos }
            }
        }
    }

    /// Converts back to wall-clock time. `None` outside the valid range.
    pub fn to_system_time(self) -> Option<SystemTime> {
        if !self.is_valid() {
            return None;
        }
        let base = if self.seconds >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_secs(self.seconds as u64))?
        } else {
            UNIX_EPOCH.checked_sub(Duration::from_secs(self.seconds.unsigned_abs()))?
        };
        base.checked_add(Duration::from_nanos(self.nanos as u64))
    }
}

/// Purpose of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TokenType {
    /// Not set; never accepted
    Unknown = 0,
    /// Authorizes API calls
    Auth = 1,
    /// Mints new auth tokens
    Refresh = 2,
    /// Unlocks static pixel reads
    Pix = 3,
}

impl TokenType {
    /// Lowercase name used in logs and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Unknown => "unknown",
            TokenType::Auth => "auth",
            TokenType::Refresh => "refresh",
            TokenType::Pix => "pix",
        }
    }
}

/// Token payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PwtPayload {
    /// Varint text of the user id
    #[prost(string, tag = "1")]
    pub subject: String,
    /// Earliest time the token is valid
    #[prost(message, optional, tag = "2")]
    pub not_before: Option<Timestamp>,
    /// Hard expiry
    #[prost(message, optional, tag = "3")]
    pub not_after: Option<Timestamp>,
    /// Soft expiry; pix tokens only
    #[prost(message, optional, tag = "4")]
    pub soft_not_after: Option<Timestamp>,
    /// Refresh token family id, zero when unset
    #[prost(int64, tag = "5")]
    pub token_id: i64,
    /// Family that minted this token, zero when unset
    #[prost(int64, tag = "6")]
    pub token_parent_id: i64,
    /// One of [`TokenType`]
    #[prost(enumeration = "TokenType", tag = "7")]
    pub r#type: i32,
    /// Issuing server, empty when unset
    #[prost(string, tag = "8")]
    pub issuer: String,
}

impl PwtPayload {
    /// The decoded token type; unrecognised values read as `Unknown`.
    pub fn token_type(&self) -> TokenType {
        TokenType::try_from(self.r#type).unwrap_or(TokenType::Unknown)
    }
}

// ---------------------------------------------------------------------------
// JSON view
// ---------------------------------------------------------------------------

/// JSON rendering of a [`PwtPayload`], used by the HTTP API and the CLI.
/// Times are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwtPayloadView {
    /// Varint text of the user id
    pub subject: String,
    /// Token type name
    #[serde(rename = "type")]
    pub token_type: String,
    /// Earliest valid time
    pub not_before: Option<i64>,
    /// Hard expiry
    pub not_after: Option<i64>,
    /// Soft expiry
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub soft_not_after: Option<i64>,
    /// Refresh token family id
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token_id: Option<i64>,
    /// Parent family id
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token_parent_id: Option<i64>,
    /// Issuing server
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub issuer: Option<String>,
}

impl From<&PwtPayload> for PwtPayloadView {
    fn from(p: &PwtPayload) -> Self {
        PwtPayloadView {
            subject: p.subject.clone(),
            token_type: p.token_type().as_str().to_string(),
            not_before: p.not_before.map(|t| t.seconds),
            not_after: p.not_after.map(|t| t.seconds),
            soft_not_after: p.soft_not_after.map(|t| t.seconds),
            token_id: (p.token_id != 0).then_some(p.token_id),
            token_parent_id: (p.token_parent_id != 0).then_some(p.token_parent_id),
            issuer: (!p.issuer.is_empty()).then(|| p.issuer.clone()),
        }
    }
}
