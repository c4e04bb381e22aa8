//! Use-time token checks for the three request paths.

use pixur_types::{PwtPayload, TokenType, Varint};

use crate::pwt::{PwtCoder, PwtError};

/// Identity carried by a valid AUTH token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthClaims {
    /// Decoded subject
    pub user_id: i64,
    /// Refresh family the token belongs to
    pub token_parent_id: Option<i64>,
}

/// Identity carried by a valid REFRESH token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshClaims {
    /// Decoded subject
    pub user_id: i64,
    /// Family the token heads
    pub token_id: i64,
}

fn decode_typed(coder: &PwtCoder, token: &str, want: TokenType) -> Result<PwtPayload, PwtError> {
    let payload = coder.decode(token.as_bytes())?;
    let actual = payload.token_type();
    if actual != want {
        return Err(PwtError::WrongType {
            expected: want.as_str(),
            actual: actual.as_str(),
        });
    }
    Ok(payload)
}

fn subject_id(payload: &PwtPayload) -> Result<i64, PwtError> {
    Ok(Varint::decode_all(&payload.subject)?.0)
}

/// AUTH paths: decode, require type AUTH, recover the user id.
pub fn validate_auth_token(coder: &PwtCoder, token: &str) -> Result<AuthClaims, PwtError> {
    let payload = decode_typed(coder, token, TokenType::Auth)?;
    Ok(AuthClaims {
        user_id: subject_id(&payload)?,
        token_parent_id: (payload.token_parent_id != 0).then_some(payload.token_parent_id),
    })
}

/// Refresh path: decode, require type REFRESH.
pub fn validate_refresh_token(coder: &PwtCoder, token: &str) -> Result<RefreshClaims, PwtError> {
    let payload = decode_typed(coder, token, TokenType::Refresh)?;
    Ok(RefreshClaims {
        user_id: subject_id(&payload)?,
        token_id: payload.token_id,
    })
}

/// Static pixel path.
///
/// Without a token the request passes only if anonymous users may read. A
/// token that is present must be a valid PIX token even then. Soft expiry is
/// not enforced here; hard expiry is.
pub fn validate_pix_token(
    coder: &PwtCoder,
    token: Option<&str>,
    anonymous_can_read: bool,
) -> Result<Option<PwtPayload>, PwtError> {
    match token.filter(|t| !t.is_empty()) {
        None if anonymous_can_read => Ok(None),
        None => Err(PwtError::MissingToken),
        Some(token) => decode_typed(coder, token, TokenType::Pix).map(Some),
    }
}
