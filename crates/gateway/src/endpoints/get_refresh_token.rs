//! # POST /api/getRefreshToken
//!
//! Identifies the caller and mints a new token set heading a fresh refresh
//! family. The caller may identify with:
//! - `refresh_token`: a live REFRESH token, whose family is rotated
//! - `previous_auth_token`: a live AUTH token, whose parent family is rotated
//! - `ident` and `secret`

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use pixur_crypto::{issue_tokens, validate_auth_token, validate_refresh_token, PwtError};
use pixur_types::{GetRefreshTokenRequest, GetRefreshTokenResponse, PwtPayloadView};

use crate::auth::{append_cookie, pix_cookie_header, reject};
use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::store::{new_token_id, UserRecord};

/// POST /api/getRefreshToken
pub async fn handle_get_refresh_token(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<GetRefreshTokenRequest>,
) -> Result<(HeaderMap, Json<GetRefreshTokenResponse>), GatewayError> {
    let (user, old_family) = identify(&state, &req).await?;

    let token_id = new_token_id();
    if !state
        .users
        .rotate_token(user.user_id, old_family, token_id)
        .await?
    {
        return Err(GatewayError::Unauthenticated(
            "refresh family is not live".to_string(),
        ));
    }

    let issued = issue_tokens(
        &state.coder,
        &state.windows,
        user.user_id,
        &user.capabilities,
        token_id,
        &state.issuer,
    );
    tracing::info!(
        user_id = user.user_id,
        token_id,
        rotated = ?old_family,
        pix = issued.pix.is_some(),
        "issued tokens"
    );

    let mut headers = HeaderMap::new();
    if let Some(pix) = &issued.pix {
        let max_age = i64::try_from(state.windows.refresh.as_secs())
            .map_err(|_| GatewayError::Internal("refresh window out of range".to_string()))?;
        append_cookie(
            &mut headers,
            pix_cookie_header(&state.pix_cookie, &pix.token, max_age)?,
        );
    }

    let response = GetRefreshTokenResponse {
        refresh_payload: PwtPayloadView::from(&issued.refresh.payload),
        auth_payload: PwtPayloadView::from(&issued.auth.payload),
        pix_payload: issued.pix.as_ref().map(|p| PwtPayloadView::from(&p.payload)),
        refresh_token: issued.refresh.token,
        auth_token: issued.auth.token,
        pix_token: issued.pix.map(|p| p.token),
    };
    Ok((headers, Json(response)))
}

/// Resolves the caller to a user and the family to retire, if any.
async fn identify(
    state: &GatewayState,
    req: &GetRefreshTokenRequest,
) -> Result<(UserRecord, Option<i64>), GatewayError> {
    if !req.refresh_token.is_empty() {
        let claims =
            validate_refresh_token(&state.coder, &req.refresh_token).map_err(|e| reject("refresh", e))?;
        let user = known_user(state, claims.user_id).await?;
        return Ok((user, Some(claims.token_id)));
    }

    if !req.previous_auth_token.is_empty() {
        let claims = validate_auth_token(&state.coder, &req.previous_auth_token)
            .map_err(|e| reject("refresh", e))?;
        let family = claims.token_parent_id.ok_or_else(|| {
            reject(
                "refresh",
                PwtError::Malformed("auth token has no parent family".to_string()),
            )
        })?;
        let user = known_user(state, claims.user_id).await?;
        return Ok((user, Some(family)));
    }

    if req.ident.is_empty() {
        return Err(reject("refresh", PwtError::MissingToken));
    }
    let user = state.users.find_by_ident(&req.ident).await?;
    let secret = req.secret.clone();
    let matched = tokio::task::spawn_blocking(move || {
        user.filter(|u| u.secret_matches(&secret))
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("secret check: {e}")))?;
    match matched {
        Some(user) => Ok((user, None)),
        None => {
            tracing::debug!(ident = %req.ident, "bad ident or secret");
            Err(GatewayError::Unauthenticated(
                "bad ident or secret".to_string(),
            ))
        }
    }
}

async fn known_user(state: &GatewayState, user_id: i64) -> Result<UserRecord, GatewayError> {
    state.users.find_by_id(user_id).await?.ok_or_else(|| {
        tracing::debug!(user_id, "token subject names no user");
        GatewayError::Unauthenticated("unknown user".to_string())
    })
}
