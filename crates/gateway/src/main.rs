//! # Pixur Gateway
//!
//! HTTP edge for the token lifecycle and static pixel reads.
//!
//! ## Responsibilities
//! - Issue and rotate refresh-token families
//! - Log out by ending a family
//! - Gate `/pix/` reads on PIX tokens
//!
//! ## API endpoints
//! - `POST /api/getRefreshToken` - token issuance
//! - `POST /api/deleteToken` - logout
//! - `GET /pix/{file}` - pixel file

mod auth;
mod config;
mod endpoints;
mod error;
mod store;

use axum::routing::{get, post};

use config::GatewayConfig;
use endpoints::{handle_delete_token, handle_get_refresh_token, handle_read_pix};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::from_env()?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        pix_root = %config.pix_root.display(),
        anonymous_pic_read = config.anonymous_pic_read,
        auth_window_secs = config.windows.auth.as_secs(),
        refresh_window_secs = config.windows.refresh.as_secs(),
        "gateway configuration"
    );
    let addr = config.listen_addr.clone();
    let state = config.into_state()?;

    let app = axum::Router::new()
        .route("/api/getRefreshToken", post(handle_get_refresh_token))
        .route("/api/deleteToken", post(handle_delete_token))
        .route("/pix/{file}", get(handle_read_pix))
        .with_state(state);

    tracing::info!("starting gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
