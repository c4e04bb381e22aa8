//! # Gateway configuration and shared state
//!
//! Settings come from the environment; the state built from them is shared
//! by every handler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pixur_crypto::issue::MAX_WINDOW;
use pixur_crypto::{PwtCoder, TokenWindows};
use pixur_types::{Capability, CapabilitySet, DEFAULT_PIX_TOKEN_COOKIE};
use rand::RngCore;

use crate::store::{InMemoryUserStore, UserStore};

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `PIXUR_LISTEN_ADDR`
    pub listen_addr: String,
    /// `PIXUR_TOKEN_SECRET`, hex
    pub token_secret: Vec<u8>,
    /// `PIXUR_PIX_ROOT`
    pub pix_root: PathBuf,
    /// `PIXUR_USERS_FILE`
    pub users_file: Option<PathBuf>,
    /// `PIXUR_ANONYMOUS_PIC_READ`
    pub anonymous_pic_read: bool,
    /// `PIXUR_PIX_COOKIE`
    pub pix_cookie: String,
    /// `PIXUR_AUTH_WINDOW_SECS`, `PIXUR_REFRESH_WINDOW_SECS`
    pub windows: TokenWindows,
    /// `PIXUR_ISSUER`
    pub issuer: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_secs(name: &str, default: Duration) -> anyhow::Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => parse_window(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_window(name: &str, raw: &str) -> anyhow::Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{name} must be a number of seconds: {e}"))?;
    let window = Duration::from_secs(secs);
    if window > MAX_WINDOW {
        anyhow::bail!("{name} must be at most {} seconds", MAX_WINDOW.as_secs());
    }
    Ok(window)
}

impl GatewayConfig {
    /// Reads the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let token_secret = match std::env::var("PIXUR_TOKEN_SECRET") {
            Ok(key_hex) => {
                let key = hex::decode(key_hex.trim())?;
                if key.is_empty() {
                    anyhow::bail!("PIXUR_TOKEN_SECRET must not be empty");
                }
                key
            }
            Err(_) => {
                // Tokens die with the process.
                tracing::warn!("PIXUR_TOKEN_SECRET is not set; using a random key (development only)");
                let mut key = vec![0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut key);
                key
            }
        };

        let defaults = TokenWindows::default();
        let windows = TokenWindows {
            auth: env_secs("PIXUR_AUTH_WINDOW_SECS", defaults.auth)?,
            refresh: env_secs("PIXUR_REFRESH_WINDOW_SECS", defaults.refresh)?,
        };
        if windows.auth > windows.refresh {
            anyhow::bail!("auth window must not exceed the refresh window");
        }

        let anonymous_pic_read = match std::env::var("PIXUR_ANONYMOUS_PIC_READ") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("PIXUR_ANONYMOUS_PIC_READ must be true or false: {e}"))?,
            Err(_) => false,
        };

        Ok(GatewayConfig {
            listen_addr: env_or("PIXUR_LISTEN_ADDR", "0.0.0.0:8080"),
            token_secret,
            pix_root: PathBuf::from(env_or("PIXUR_PIX_ROOT", "pix")),
            users_file: std::env::var("PIXUR_USERS_FILE").ok().map(PathBuf::from),
            anonymous_pic_read,
            pix_cookie: env_or("PIXUR_PIX_COOKIE", DEFAULT_PIX_TOKEN_COOKIE),
            windows,
            issuer: env_or("PIXUR_ISSUER", ""),
        })
    }

    /// Builds the shared state, loading the users file if one is configured.
    pub fn into_state(self) -> anyhow::Result<Arc<GatewayState>> {
        let users = match &self.users_file {
            Some(path) => {
                tracing::info!(users_file = %path.display(), "loading users");
                InMemoryUserStore::load(path)?
            }
            None => {
                tracing::warn!("PIXUR_USERS_FILE is not set; no user can log in");
                InMemoryUserStore::new([])
            }
        };
        let anonymous_capabilities = if self.anonymous_pic_read {
            [Capability::PicRead].into_iter().collect()
        } else {
            CapabilitySet::new()
        };
        Ok(Arc::new(GatewayState {
            coder: PwtCoder::new(&self.token_secret)?,
            windows: self.windows,
            issuer: self.issuer,
            users: Box::new(users),
            pix_root: self.pix_root,
            anonymous_capabilities,
            pix_cookie: self.pix_cookie,
        }))
    }
}

/// Shared gateway state.
pub struct GatewayState {
    /// Token codec keyed with the server secret
    pub coder: PwtCoder,
    /// Token lifetimes
    pub windows: TokenWindows,
    /// Stamped into issued tokens; empty for none
    pub issuer: String,
    /// Users and token families
    pub users: Box<dyn UserStore>,
    /// Root of the sharded pixel tree
    pub pix_root: PathBuf,
    /// What unauthenticated callers may do
    pub anonymous_capabilities: CapabilitySet,
    /// Cookie carrying the pix token
    pub pix_cookie: String,
}
