//! # Request authentication
//!
//! Pulls tokens out of request metadata and checks them for the three kinds
//! of path: AUTH-protected API calls, static pixel reads and the refresh
//! endpoint. Every rejection is logged at debug level with its category and
//! surfaces to the client only as `unauthenticated`.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use pixur_crypto::{validate_auth_token, validate_pix_token, AuthClaims, PwtError};
use pixur_types::{Capability, AUTH_TOKEN_HEADER, PIX_TOKEN_HEADER};

use crate::config::GatewayState;
use crate::error::GatewayError;

/// Logs a token rejection and turns it into the opaque client error.
pub(crate) fn reject(path: &'static str, err: PwtError) -> GatewayError {
    tracing::debug!(path, category = ?err.category(), error = %err, "token rejected");
    GatewayError::Unauthenticated(err.to_string())
}

/// Values of `name` that are valid UTF-8, in order.
fn header_values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect()
}

/// Every value of the cookie `name` across all `Cookie` headers.
fn cookie_values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
    header_values(headers, COOKIE.as_str())
        .into_iter()
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .collect()
}

/// Checks the AUTH token header.
pub(crate) fn require_auth(
    state: &GatewayState,
    headers: &HeaderMap,
) -> Result<AuthClaims, GatewayError> {
    let tokens = header_values(headers, AUTH_TOKEN_HEADER);
    let token = match tokens.as_slice() {
        [token] => *token,
        [] => return Err(reject("auth", PwtError::MissingToken)),
        _ => {
            return Err(reject(
                "auth",
                PwtError::Malformed("too many tokens".to_string()),
            ))
        }
    };
    validate_auth_token(&state.coder, token).map_err(|e| reject("auth", e))
}

/// Checks read access to static pixels. The token may come from the pix
/// cookie or the pix token header, but only one may be sent.
pub(crate) fn check_pix_access(state: &GatewayState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let mut tokens = cookie_values(headers, &state.pix_cookie);
    tokens.extend(header_values(headers, PIX_TOKEN_HEADER));
    if tokens.len() > 1 {
        return Err(reject("pix", PwtError::Malformed("too many tokens".to_string())));
    }
    let anonymous_can_read = state.anonymous_capabilities.has(Capability::PicRead);
    let payload = validate_pix_token(&state.coder, tokens.first().copied(), anonymous_can_read)
        .map_err(|e| reject("pix", e))?;
    if let Some(payload) = payload {
        tracing::trace!(subject = %payload.subject, "pix token accepted");
    }
    Ok(())
}

/// `Set-Cookie` for the pix token, scoped to `/pix/`.
pub(crate) fn pix_cookie_header(
    name: &str,
    token: &str,
    max_age_secs: i64,
) -> Result<HeaderValue, GatewayError> {
    let cookie =
        format!("{name}={token}; Path=/pix/; Max-Age={max_age_secs}; HttpOnly; SameSite=Strict");
    HeaderValue::from_str(&cookie).map_err(|e| GatewayError::Internal(format!("bad cookie: {e}")))
}

/// Adds a `Set-Cookie` header.
pub(crate) fn append_cookie(headers: &mut HeaderMap, value: HeaderValue) {
    headers.append(SET_COOKIE, value);
}
