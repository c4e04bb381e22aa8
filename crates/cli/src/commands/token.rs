//! Token command implementation.

use std::time::{Duration, SystemTime};

use anyhow::{bail, Context};
use pixur_crypto::issue::CLOCK_SKEW;
use pixur_crypto::pwt::decode_unverified;
use pixur_crypto::{PwtCoder, TokenState};
use pixur_types::{PwtPayload, PwtPayloadView, Timestamp, TokenType, Varint};
use serde::Serialize;

/// Inputs to [`mint`].
#[derive(Debug, Clone)]
pub struct MintOptions {
    pub user_id: i64,
    pub token_type: TokenType,
    pub ttl_secs: u64,
    pub soft_ttl_secs: Option<u64>,
    pub token_id: i64,
    pub parent_id: i64,
    pub issuer: String,
}

/// Output of `token inspect`.
#[derive(Debug, Serialize)]
struct Inspection {
    verified: bool,
    state: &'static str,
    payload: PwtPayloadView,
}

pub fn secret_bytes(secret: &str, is_hex: bool) -> anyhow::Result<Vec<u8>> {
    if is_hex {
        hex::decode(secret.trim()).context("secret is not valid hex")
    } else {
        Ok(secret.as_bytes().to_vec())
    }
}

pub fn parse_type(name: &str) -> anyhow::Result<TokenType> {
    match name.to_ascii_lowercase().as_str() {
        "auth" => Ok(TokenType::Auth),
        "refresh" => Ok(TokenType::Refresh),
        "pix" => Ok(TokenType::Pix),
        other => bail!("unknown token type {other:?}, want auth, refresh or pix"),
    }
}

pub fn state_name(state: TokenState) -> &'static str {
    match state {
        TokenState::NotYetValid => "not_yet_valid",
        TokenState::Live => "live",
        TokenState::SoftExpired => "soft_expired",
        TokenState::Expired => "expired",
    }
}

/// Builds the payload `mint` signs. The window opens one clock skew early.
pub fn mint_payload(opts: &MintOptions, now: SystemTime) -> PwtPayload {
    let at = |d: Duration| Timestamp::from_system_time(now + d);
    PwtPayload {
        subject: Varint(opts.user_id).encode(),
        not_before: Some(Timestamp::from_system_time(now - CLOCK_SKEW)),
        not_after: Some(at(Duration::from_secs(opts.ttl_secs))),
        soft_not_after: opts.soft_ttl_secs.map(|s| at(Duration::from_secs(s))),
        token_id: opts.token_id,
        token_parent_id: opts.parent_id,
        r#type: opts.token_type as i32,
        issuer: opts.issuer.clone(),
    }
}

/// Runs `token mint`, printing the signed token.
pub fn mint(secret: &[u8], opts: &MintOptions) -> anyhow::Result<()> {
    if let Some(soft) = opts.soft_ttl_secs {
        if soft > opts.ttl_secs {
            bail!("soft ttl {soft}s exceeds ttl {}s", opts.ttl_secs);
        }
    }
    let coder = PwtCoder::new(secret)?;
    let payload = mint_payload(opts, coder.now());
    tracing::debug!(
        user_id = opts.user_id,
        token_type = opts.token_type.as_str(),
        ttl_secs = opts.ttl_secs,
        "minting token"
    );
    println!("{}", coder.encode(&payload));
    Ok(())
}

/// Runs `token inspect`. Without a secret the signature is not checked, but
/// the lifetime state is still reported.
pub fn inspect(token: &str, secret: Option<&[u8]>) -> anyhow::Result<()> {
    let token = token.trim();
    let now = SystemTime::now();
    let (payload, verified) = match secret {
        Some(key) => {
            let coder = PwtCoder::new(key)?;
            // Expired tokens are still worth showing; only the signature must hold.
            match coder.decode(token.as_bytes()) {
                Ok(p) => (p, true),
                Err(e @ (pixur_crypto::PwtError::Expired | pixur_crypto::PwtError::NotYetValid)) => {
                    tracing::debug!(error = %e, "token outside its window");
                    (decode_unverified(token.as_bytes())?, true)
                }
                Err(e) => return Err(e).context("token rejected"),
            }
        }
        None => (decode_unverified(token.as_bytes())?, false),
    };

    let out = Inspection {
        verified,
        state: state_name(TokenState::at(&payload, now)),
        payload: PwtPayloadView::from(&payload),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(token_type: TokenType) -> MintOptions {
        MintOptions {
            user_id: 7,
            token_type,
            ttl_secs: 3600,
            soft_ttl_secs: None,
            token_id: 0,
            parent_id: 0,
            issuer: String::new(),
        }
    }

    #[test]
    fn test_parse_type() {
        assert_eq!(parse_type("AUTH").unwrap(), TokenType::Auth);
        assert_eq!(parse_type("pix").unwrap(), TokenType::Pix);
        assert!(parse_type("bearer").is_err());
    }

    #[test]
    fn test_secret_bytes_hex() {
        assert_eq!(secret_bytes("00ff", true).unwrap(), vec![0x00, 0xff]);
        assert_eq!(secret_bytes("00ff", false).unwrap(), b"00ff".to_vec());
        assert!(secret_bytes("zz", true).is_err());
    }

    #[test]
    fn test_minted_payload_decodes_live() {
        let now = SystemTime::now();
        let mut o = opts(TokenType::Pix);
        o.soft_ttl_secs = Some(60);
        let payload = mint_payload(&o, now);
        assert_eq!(payload.subject, "h6");
        assert_eq!(payload.token_type(), TokenType::Pix);

        let coder = PwtCoder::new(b"k").unwrap();
        let decoded = coder.decode(coder.encode(&payload).as_bytes()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(TokenState::at(&decoded, now), TokenState::Live);
        assert_eq!(
            TokenState::at(&decoded, now + Duration::from_secs(120)),
            TokenState::SoftExpired
        );
    }

    #[test]
    fn test_mint_rejects_soft_after_hard() {
        let mut o = opts(TokenType::Pix);
        o.soft_ttl_secs = Some(o.ttl_secs + 1);
        assert!(mint(b"k", &o).is_err());
    }

    #[test]
    fn test_inspect_wrong_secret_fails() {
        let coder = PwtCoder::new(b"right").unwrap();
        let token = coder.encode(&mint_payload(&opts(TokenType::Auth), SystemTime::now()));
        assert!(inspect(&token, Some(b"wrong")).is_err());
        assert!(inspect(&token, Some(b"right")).is_ok());
        assert!(inspect(&token, None).is_ok());
    }
}
