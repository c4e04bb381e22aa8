//! Login command implementation.
//!
//! Keeps the last `getRefreshToken` response in a file and only talks to the
//! gateway when the saved tokens are no longer good enough.

use std::io::{BufRead, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context};
use pixur_crypto::pwt::decode_unverified;
use pixur_crypto::TokenState;
use pixur_types::{ErrorResponse, GetRefreshTokenRequest, GetRefreshTokenResponse};

/// What `login` does with the saved tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPlan {
    /// Saved tokens are live; no request needed
    Reuse,
    /// Mint new tokens from the saved refresh token
    Refresh(String),
    /// Fall back to ident and secret
    Authenticate,
}

fn state_of(token: &str, now: SystemTime) -> TokenState {
    match decode_unverified(token.as_bytes()) {
        Ok(payload) => TokenState::at(&payload, now),
        Err(_) => TokenState::Expired,
    }
}

/// Decides how to proceed from a saved response. A soft-expired pix token
/// or an unusable auth token triggers a refresh while the refresh token is
/// still live; a dead refresh token means logging in again.
pub fn plan(saved: Option<&GetRefreshTokenResponse>, now: SystemTime) -> LoginPlan {
    let Some(saved) = saved else {
        return LoginPlan::Authenticate;
    };
    let auth = state_of(&saved.auth_token, now);
    let pix = saved.pix_token.as_deref().map(|t| state_of(t, now));

    if auth == TokenState::Live && pix.map_or(true, |s| s == TokenState::Live) {
        return LoginPlan::Reuse;
    }
    if state_of(&saved.refresh_token, now).is_usable() {
        return LoginPlan::Refresh(saved.refresh_token.clone());
    }
    LoginPlan::Authenticate
}

fn load(path: &Path) -> Option<GetRefreshTokenResponse> {
    let data = std::fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(saved) => Some(saved),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable token file");
            None
        }
    }
}

async fn request_tokens(
    gateway: &str,
    req: &GetRefreshTokenRequest,
) -> anyhow::Result<GetRefreshTokenResponse> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let url = format!("{}/api/getRefreshToken", gateway.trim_end_matches('/'));
    let resp = client
        .post(&url)
        .json(req)
        .send()
        .await
        .with_context(|| format!("POST {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<ErrorResponse>(&body)
            .map(|e| format!("{}: {}", e.code, e.message))
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        bail!("gateway returned {status}: {message}");
    }
    Ok(resp.json().await?)
}

/// Runs the login command.
pub async fn run(
    gateway: &str,
    ident: Option<&str>,
    secret: Option<&str>,
    token_file: &Path,
) -> anyhow::Result<()> {
    let saved = load(token_file);
    let decision = plan(saved.as_ref(), SystemTime::now());
    tracing::debug!(?decision, "login plan");

    let fresh = match decision {
        LoginPlan::Reuse => {
            tracing::info!("saved tokens are still live");
            if let Some(saved) = saved {
                println!("{}", serde_json::to_string_pretty(&saved)?);
            }
            return Ok(());
        }
        LoginPlan::Refresh(refresh_token) => {
            let req = GetRefreshTokenRequest {
                refresh_token,
                ..Default::default()
            };
            match request_tokens(gateway, &req).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(error = %e, "refresh failed, logging in again");
                    authenticate(gateway, ident, secret).await?
                }
            }
        }
        LoginPlan::Authenticate => authenticate(gateway, ident, secret).await?,
    };

    std::fs::write(token_file, serde_json::to_vec_pretty(&fresh)?)
        .with_context(|| format!("write {}", token_file.display()))?;
    tracing::info!(path = %token_file.display(), subject = %fresh.auth_payload.subject, "tokens saved");
    println!("{}", serde_json::to_string_pretty(&fresh)?);
    Ok(())
}

async fn authenticate(
    gateway: &str,
    ident: Option<&str>,
    secret: Option<&str>,
) -> anyhow::Result<GetRefreshTokenResponse> {
    let ident = ident.map(str::to_string);
    let secret = secret.map(str::to_string);
    let (ident, secret) = tokio::task::spawn_blocking(move || {
        credentials(ident, secret, prompt_ident, || {
            Ok(rpassword::prompt_password("secret: ")?)
        })
    })
    .await??;
    let req = GetRefreshTokenRequest {
        ident,
        secret,
        ..Default::default()
    };
    request_tokens(gateway, &req).await
}

/// Fills in whichever of ident and secret the flags left out.
pub fn credentials(
    ident: Option<String>,
    secret: Option<String>,
    ask_ident: impl FnOnce() -> anyhow::Result<String>,
    ask_secret: impl FnOnce() -> anyhow::Result<String>,
) -> anyhow::Result<(String, String)> {
    let ident = match ident {
        Some(ident) => ident,
        None => ask_ident()?,
    };
    if ident.is_empty() {
        bail!("no ident given");
    }
    let secret = match secret {
        Some(secret) => secret,
        None => ask_secret()?,
    };
    Ok((ident, secret))
}

fn prompt_ident() -> anyhow::Result<String> {
    read_ident(&mut std::io::stdin().lock(), &mut std::io::stderr())
}

fn read_ident(input: &mut impl BufRead, prompt: &mut impl Write) -> anyhow::Result<String> {
    write!(prompt, "ident: ")?;
    prompt.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("no ident given");
    }
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixur_crypto::{issue_tokens, PwtCoder, TokenWindows};
    use pixur_types::{Capability, CapabilitySet, PwtPayloadView, Timestamp};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn saved(now: SystemTime, pix: bool) -> GetRefreshTokenResponse {
        let coder = PwtCoder::with_clock(b"k", std::sync::Arc::new(move || now)).unwrap();
        let mut caps = CapabilitySet::new();
        if pix {
            caps.insert(Capability::PicRead);
        }
        let t = issue_tokens(&coder, &TokenWindows::default(), 7, &caps, 42, "");
        GetRefreshTokenResponse {
            refresh_token: t.refresh.token,
            auth_token: t.auth.token,
            refresh_payload: PwtPayloadView::from(&t.refresh.payload),
            auth_payload: PwtPayloadView::from(&t.auth.payload),
            pix_payload: t.pix.as_ref().map(|p| PwtPayloadView::from(&p.payload)),
            pix_token: t.pix.map(|p| p.token),
        }
    }

    #[test]
    fn test_plan_without_saved_tokens() {
        assert_eq!(plan(None, SystemTime::now()), LoginPlan::Authenticate);
    }

    #[test]
    fn test_plan_reuses_live_tokens() {
        let now = SystemTime::now();
        let s = saved(now, true);
        assert_eq!(plan(Some(&s), now + DAY), LoginPlan::Reuse);
    }

    #[test]
    fn test_plan_refreshes_after_auth_window() {
        let now = SystemTime::now();
        let s = saved(now, false);
        assert_eq!(
            plan(Some(&s), now + 31 * DAY),
            LoginPlan::Refresh(s.refresh_token.clone())
        );
    }

    #[test]
    fn test_plan_refreshes_soft_expired_pix() {
        let now = SystemTime::now();
        let mut s = saved(now, true);
        let coder = PwtCoder::new(b"k").unwrap();
        let pix = pixur_types::PwtPayload {
            subject: "h6".to_string(),
            not_before: Some(Timestamp::from_system_time(now - DAY)),
            not_after: Some(Timestamp::from_system_time(now + DAY)),
            soft_not_after: Some(Timestamp::from_system_time(now - Duration::from_secs(5))),
            r#type: pixur_types::TokenType::Pix as i32,
            ..Default::default()
        };
        s.pix_token = Some(coder.encode(&pix));
        assert_eq!(plan(Some(&s), now), LoginPlan::Refresh(s.refresh_token.clone()));
    }

    #[test]
    fn test_plan_reauthenticates_after_refresh_window() {
        let now = SystemTime::now();
        let s = saved(now, true);
        assert_eq!(plan(Some(&s), now + 181 * DAY), LoginPlan::Authenticate);
    }

    #[test]
    fn test_plan_treats_garbage_as_expired() {
        let now = SystemTime::now();
        let mut s = saved(now, false);
        s.auth_token = "not.a.token".to_string();
        assert!(matches!(plan(Some(&s), now), LoginPlan::Refresh(_)));
        s.refresh_token = "junk".to_string();
        assert_eq!(plan(Some(&s), now), LoginPlan::Authenticate);
    }

    #[test]
    fn test_credentials_prompt_only_for_missing_parts() {
        let both = credentials(
            Some("alice".to_string()),
            Some("pw".to_string()),
            || panic!("ident prompted"),
            || panic!("secret prompted"),
        )
        .unwrap();
        assert_eq!(both, ("alice".to_string(), "pw".to_string()));

        let asked = credentials(
            Some("alice".to_string()),
            None,
            || panic!("ident prompted"),
            || Ok("typed".to_string()),
        )
        .unwrap();
        assert_eq!(asked.1, "typed");

        let asked = credentials(None, None, || Ok("bob".to_string()), || Ok("pw".to_string()))
            .unwrap();
        assert_eq!(asked, ("bob".to_string(), "pw".to_string()));
    }

    #[test]
    fn test_credentials_require_an_ident() {
        let err = credentials(None, None, || Ok(String::new()), || Ok("pw".to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn test_read_ident_trims_line() {
        let mut input = std::io::Cursor::new(b"  alice \n".to_vec());
        let mut prompt = Vec::new();
        assert_eq!(read_ident(&mut input, &mut prompt).unwrap(), "alice");
        assert_eq!(prompt, b"ident: ");

        let mut empty = std::io::Cursor::new(Vec::new());
        assert!(read_ident(&mut empty, &mut Vec::new()).is_err());
    }
}
