//! Path command implementation.

use std::path::{Path, PathBuf};

use anyhow::Context;
use pixur_types::{pic_path, pic_relative_url, thumbnail_path, thumbnail_relative_url, Varint};

/// Where a pic lives on disk and under `/pix/`.
#[derive(Debug, PartialEq, Eq)]
pub struct PicLocation {
    pub pic_id: i64,
    pub file: PathBuf,
    pub url: String,
}

/// Accepts a decimal id or its varint text. Decimal wins when both parse.
pub fn parse_pic_id(id: &str) -> anyhow::Result<i64> {
    if let Ok(n) = id.parse::<i64>() {
        return Ok(n);
    }
    let Varint(n) = Varint::decode_all(id).with_context(|| format!("bad pic id {id:?}"))?;
    Ok(n)
}

pub fn locate(pic_id: i64, ext: &str, root: &Path, thumbnail: bool) -> PicLocation {
    let (file, url) = if thumbnail {
        (
            thumbnail_path(root, pic_id, ext),
            thumbnail_relative_url(pic_id, ext),
        )
    } else {
        (pic_path(root, pic_id, ext), pic_relative_url(pic_id, ext))
    };
    PicLocation { pic_id, file, url }
}

/// Runs the path command.
pub fn run(id: &str, ext: &str, root: &Path, thumbnail: bool) -> anyhow::Result<()> {
    let loc = locate(parse_pic_id(id)?, ext, root, thumbnail);
    println!("id:   {} ({})", loc.pic_id, Varint(loc.pic_id).encode());
    println!("file: {}", loc.file.display());
    println!("url:  {}", loc.url);
    Ok(())
}
