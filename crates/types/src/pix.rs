//! # Pix file layout
//!
//! Pixel files are sharded under the pix root by the characters of the pic
//! id's varint text. For an id whose text is `c1 c2 ... cn` the file lives at
//! `<root>/c1/c2/.../c(n-1)/c1c2...cn.<ext>`, and the thumbnail sits beside it
//! with a `0` appended to the stem.

use std::path::{Path, PathBuf};

use crate::varint::{Varint, VarintError};

/// Glyph appended to the stem of thumbnail files.
pub const THUMBNAIL_SUFFIX: char = '0';

/// Directory holding the pic's files.
pub fn pic_base_dir(pix_root: &Path, pic_id: i64) -> PathBuf {
    let text = Varint(pic_id).encode();
    let mut dir = pix_root.to_path_buf();
    // The last character is left out so that siblings share a directory.
    for c in text[..text.len() - 1].chars() {
        dir.push(c.to_string());
    }
    dir
}

/// Primary file of a pic.
pub fn pic_path(pix_root: &Path, pic_id: i64, ext: &str) -> PathBuf {
    pic_base_dir(pix_root, pic_id).join(format!("{}.{ext}", Varint(pic_id)))
}

/// Thumbnail file of a pic.
pub fn thumbnail_path(pix_root: &Path, pic_id: i64, ext: &str) -> PathBuf {
    pic_base_dir(pix_root, pic_id).join(format!(
        "{}{THUMBNAIL_SUFFIX}.{ext}",
        Varint(pic_id)
    ))
}

/// URL of a pic relative to the site root.
pub fn pic_relative_url(pic_id: i64, ext: &str) -> String {
    format!("pix/{}.{ext}", Varint(pic_id))
}

/// URL of a pic's thumbnail relative to the site root.
pub fn thumbnail_relative_url(pic_id: i64, ext: &str) -> String {
    format!("pix/{}{THUMBNAIL_SUFFIX}.{ext}", Varint(pic_id))
}

/// A request for a file under `pix/`, parsed from its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixFileName {
    /// Pic the file belongs to
    pub pic_id: i64,
    /// Whether the thumbnail was requested
    pub thumbnail: bool,
    /// Lowercased extension, without the dot
    pub ext: String,
}

/// Pix file name parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PixFileNameError {
    /// No `.ext` suffix
    #[error("missing extension")]
    MissingExtension,
    /// Extension holds something other than ASCII letters and digits
    #[error("bad extension")]
    BadExtension,
    /// The stem is not a varint, optionally followed by the thumbnail glyph
    #[error("bad pic id: {0}")]
    BadId(#[from] VarintError),
    /// Characters after the id that are not the thumbnail glyph
    #[error("unexpected trailing characters")]
    Trailing,
}

impl PixFileName {
    /// Parses `<id>.<ext>` or `<id>0.<ext>`.
    ///
    /// Varints are self-delimiting, so the thumbnail glyph can never be
    /// mistaken for part of the id.
    pub fn parse(name: &str) -> Result<Self, PixFileNameError> {
        let (stem, ext) = name
            .rsplit_once('.')
            .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
            .ok_or(PixFileNameError::MissingExtension)?;
        if !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(PixFileNameError::BadExtension);
        }
        let (id, n) = Varint::decode_prefix(stem)?;
        let thumbnail = match &stem[n..] {
            "" => false,
            rest if rest.len() == 1 && rest.starts_with(THUMBNAIL_SUFFIX) => true,
            _ => return Err(PixFileNameError::Trailing),
        };
        Ok(PixFileName {
            pic_id: id.0,
            thumbnail,
            ext: ext.to_ascii_lowercase(),
        })
    }

    /// Location of the named file under `pix_root`.
    pub fn path(&self, pix_root: &Path) -> PathBuf {
        if self.thumbnail {
            thumbnail_path(pix_root, self.pic_id, &self.ext)
        } else {
            pic_path(pix_root, self.pic_id, &self.ext)
        }
    }
}
