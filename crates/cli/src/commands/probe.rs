//! Probe command implementation.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use pixur_core::{decode_media, DecodedMedia, MediaError, WebmProber};
use serde::Serialize;

/// JSON summary printed by `probe`.
#[derive(Debug, Serialize, PartialEq)]
pub struct MediaSummary {
    pub format: String,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl From<&DecodedMedia> for MediaSummary {
    fn from(media: &DecodedMedia) -> Self {
        let frame = media.frame();
        let (format, duration_secs, tags) = match media {
            DecodedMedia::Webm(w) => (
                "webm".to_string(),
                Some(w.duration.as_secs_f64()),
                w.tags.clone(),
            ),
            DecodedMedia::Still { format, .. } => {
                (format!("{format:?}").to_lowercase(), None, BTreeMap::new())
            }
        };
        MediaSummary {
            format,
            width: frame.width(),
            height: frame.height(),
            duration_secs,
            tags,
        }
    }
}

/// Runs the probe command.
pub async fn run(file: &Path, frame_out: Option<&Path>) -> anyhow::Result<()> {
    let input = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("open {}", file.display()))?;

    let prober = WebmProber::from_env();
    let media = match decode_media(&prober, input).await {
        Ok(media) => media,
        Err(e) => {
            if let MediaError::Webm(w) = &e {
                if let Some(info) = w.debug_info() {
                    tracing::warn!(category = ?e.category(), "tool output:\n{info}");
                }
            }
            return Err(e).with_context(|| format!("decode {}", file.display()));
        }
    };

    println!("{}", serde_json::to_string_pretty(&MediaSummary::from(&media))?);

    if let Some(out) = frame_out {
        media
            .frame()
            .save(out)
            .with_context(|| format!("write frame to {}", out.display()))?;
        tracing::info!(path = %out.display(), "frame written");
    }
    Ok(())
}
