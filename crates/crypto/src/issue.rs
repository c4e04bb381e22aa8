//! # Token issuance and lifecycle
//!
//! Every successful identification mints a REFRESH token heading a new
//! family, an AUTH token in that family, and a PIX token when the user may
//! read pixels.

use std::time::{Duration, SystemTime};

use pixur_types::{Capability, CapabilitySet, PwtPayload, Timestamp, TokenType, Varint};

use crate::pwt::{check_validity, order_key, PwtCoder, PwtError};

/// Back-dating applied to `not_before` to absorb clock skew.
pub const CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Default lifetime of AUTH tokens and the soft lifetime of PIX tokens.
pub const DEFAULT_AUTH_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default lifetime of REFRESH tokens and the hard lifetime of PIX tokens.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(180 * 24 * 60 * 60);

/// Longest configurable window. Expiry times must stay inside the
/// well-known timestamp range.
pub const MAX_WINDOW: Duration = Duration::from_secs(1000 * 365 * 24 * 60 * 60);

/// Token lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenWindows {
    /// AUTH hard expiry, PIX soft expiry
    pub auth: Duration,
    /// REFRESH and PIX hard expiry
    pub refresh: Duration,
}

impl Default for TokenWindows {
    fn default() -> Self {
        TokenWindows {
            auth: DEFAULT_AUTH_WINDOW,
            refresh: DEFAULT_REFRESH_WINDOW,
        }
    }
}

/// A token and the payload it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedToken {
    /// `H.P.S` text
    pub token: String,
    /// Decoded payload
    pub payload: PwtPayload,
}

/// Result of one identification.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedTokens {
    /// Heads the new family; `token_id` is the family id
    pub refresh: SignedToken,
    /// Member of the family
    pub auth: SignedToken,
    /// Present only for users holding `PIC_READ`
    pub pix: Option<SignedToken>,
}

/// Mints the token set for `user_id`.
///
/// `token_id` is the fresh family id chosen by the caller. Times are whole
/// seconds taken from the coder's clock.
pub fn issue_tokens(
    coder: &PwtCoder,
    windows: &TokenWindows,
    user_id: i64,
    capabilities: &CapabilitySet,
    token_id: i64,
    issuer: &str,
) -> IssuedTokens {
    let now = Timestamp::from_system_time(coder.now()).seconds;
    let at = |offset: Duration, back: bool| {
        let secs = i64::try_from(offset.as_secs()).unwrap_or(i64::MAX);
        let t = if back {
            now.saturating_sub(secs)
        } else {
            now.saturating_add(secs)
        };
        Some(Timestamp::from_unix_secs(t))
    };

    let base = PwtPayload {
        subject: Varint(user_id).encode(),
        not_before: at(CLOCK_SKEW, true),
        issuer: issuer.to_string(),
        ..Default::default()
    };

    let refresh = PwtPayload {
        not_after: at(windows.refresh, false),
        token_id,
        r#type: TokenType::Refresh as i32,
        ..base.clone()
    };
    let auth = PwtPayload {
        not_after: at(windows.auth, false),
        token_parent_id: token_id,
        r#type: TokenType::Auth as i32,
        ..base.clone()
    };
    let pix = capabilities.has(Capability::PicRead).then(|| PwtPayload {
        not_after: at(windows.refresh, false),
        soft_not_after: at(windows.auth, false),
        token_parent_id: token_id,
        r#type: TokenType::Pix as i32,
        ..base
    });

    let sign = |payload: PwtPayload| SignedToken {
        token: coder.encode(&payload),
        payload,
    };
    IssuedTokens {
        refresh: sign(refresh),
        auth: sign(auth),
        pix: pix.map(sign),
    }
}

/// Where a token sits in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Before `not_before`
    NotYetValid,
    /// Usable
    Live,
    /// Past `soft_not_after` but not `not_after`; still usable, refresh soon
    SoftExpired,
    /// Past `not_after`, or no validity window
    Expired,
}

impl TokenState {
    /// State of `payload` at `now`. Does not check the signature.
    pub fn at(payload: &PwtPayload, now: SystemTime) -> Self {
        match check_validity(payload, now) {
            Err(PwtError::NotYetValid) => TokenState::NotYetValid,
            Err(_) => TokenState::Expired,
            Ok(()) => match payload.soft_not_after {
                Some(soft)
                    if order_key(Timestamp::from_system_time(now)) > order_key(soft) =>
                {
                    TokenState::SoftExpired
                }
                _ => TokenState::Live,
            },
        }
    }

    /// Whether the token still authorizes requests.
    pub fn is_usable(self) -> bool {
        matches!(self, TokenState::Live | TokenState::SoftExpired)
    }
}
