//! User command implementation.

use anyhow::{bail, Context};
use pixur_types::{Capability, CapabilitySet};
use serde::Serialize;

/// One element of the gateway's users file.
#[derive(Debug, Serialize)]
pub struct UserEntry {
    pub user_id: i64,
    pub ident: String,
    pub secret_hash: String,
    pub capabilities: CapabilitySet,
}

pub fn parse_capabilities(names: &[String]) -> anyhow::Result<CapabilitySet> {
    names
        .iter()
        .map(|name| {
            let upper = name.trim().to_ascii_uppercase();
            serde_json::from_value::<Capability>(serde_json::Value::String(upper))
                .with_context(|| format!("unknown capability {name:?}"))
        })
        .collect()
}

pub fn entry(
    user_id: i64,
    ident: &str,
    capabilities: &[String],
    secret_hash: String,
) -> anyhow::Result<UserEntry> {
    if ident.is_empty() {
        bail!("ident must not be empty");
    }
    Ok(UserEntry {
        user_id,
        ident: ident.to_string(),
        secret_hash,
        capabilities: parse_capabilities(capabilities)?,
    })
}

/// Runs the user command. The secret is read twice without echo.
pub fn run(user_id: i64, ident: &str, capabilities: &[String]) -> anyhow::Result<()> {
    parse_capabilities(capabilities)?;
    let secret = rpassword::prompt_password("secret: ")?;
    if secret != rpassword::prompt_password("again: ")? {
        bail!("secrets differ");
    }
    let out = entry(user_id, ident, capabilities, pixur_crypto::hash_secret(&secret)?)?;
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
