//! # POST /api/deleteToken
//!
//! Logout: ends the refresh family of the presented AUTH token. Every token
//! minted in that family stops being refreshable; the pix cookie is cleared.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use pixur_crypto::PwtError;
use pixur_types::DeleteTokenResponse;

use crate::auth::{append_cookie, pix_cookie_header, reject, require_auth};
use crate::config::GatewayState;
use crate::error::GatewayError;

/// POST /api/deleteToken
pub async fn handle_delete_token(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<DeleteTokenResponse>), GatewayError> {
    let claims = require_auth(&state, &headers)?;
    let family = claims.token_parent_id.ok_or_else(|| {
        reject(
            "auth",
            PwtError::Malformed("auth token has no parent family".to_string()),
        )
    })?;

    if !state.users.revoke_token(claims.user_id, family).await? {
        tracing::debug!(user_id = claims.user_id, family, "family already ended");
        return Err(GatewayError::Unauthenticated(
            "refresh family is not live".to_string(),
        ));
    }
    tracing::info!(user_id = claims.user_id, family, "logged out");

    let mut out = HeaderMap::new();
    append_cookie(&mut out, pix_cookie_header(&state.pix_cookie, "", 0)?);
    Ok((out, Json(DeleteTokenResponse {})))
}
