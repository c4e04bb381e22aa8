//! # GET /pix/{file}
//!
//! Serves a pic or thumbnail from the sharded pix tree. Requires a PIX token
//! unless anonymous users may read. Soft-expired PIX tokens are accepted.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use pixur_types::PixFileName;

use crate::auth::check_pix_access;
use crate::config::GatewayState;
use crate::error::GatewayError;

fn content_type(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// GET /pix/{file}
pub async fn handle_read_pix(
    State(state): State<Arc<GatewayState>>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    check_pix_access(&state, &headers)?;

    let name = PixFileName::parse(&file)
        .map_err(|e| GatewayError::InvalidArgument(format!("bad pix name {file:?}: {e}")))?;
    let path = name.path(&state.pix_root);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GatewayError::NotFound(file));
        }
        Err(e) => {
            return Err(GatewayError::Internal(format!(
                "read {}: {e}",
                path.display()
            )))
        }
    };
    tracing::debug!(pic_id = name.pic_id, thumbnail = name.thumbnail, bytes = data.len(), "serving pix");
    Ok(([(CONTENT_TYPE, content_type(&name.ext))], data))
}
