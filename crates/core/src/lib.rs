//! # Pixur media core
//!
//! Turns an uploaded byte stream into a single raster frame plus facts about
//! the container.
//!
//! ## Flow
//! 1. Peek the leading magic bytes
//! 2. EBML magic: run the WebM probe/convert pipeline ([`webm`])
//! 3. Otherwise: decode as a still image with the `image` crate

pub mod probe;
pub mod webm;

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use pixur_types::ErrorCategory;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use probe::{check_valid_webm, parse_duration, ProbeResponse, ValidationError};
pub use webm::{ToolCommand, WebmError, WebmImage, WebmProber};

/// EBML header magic opening every Matroska/WebM file.
pub const EBML_MAGIC: &[u8; 4] = b"\x1a\x45\xdf\xa3";

/// Bytes peeked to choose a decoder. WebP needs twelve.
const SNIFF_LEN: usize = 16;

/// Media error type.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Leading bytes match no supported format
    #[error("unrecognized media format")]
    UnknownFormat,
    /// Upstream read failed
    #[error("failed to read media: {0}")]
    Read(#[from] std::io::Error),
    /// Still image failed to decode
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    /// WebM pipeline failed
    #[error(transparent)]
    Webm(#[from] WebmError),
}

impl MediaError {
    /// Coarse class of the failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::UnknownFormat | MediaError::Image(_) => ErrorCategory::MalformedInput,
            MediaError::Read(_) => ErrorCategory::ResourceFailure,
            MediaError::Webm(e) => e.category(),
        }
    }
}

/// Formats recognised by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    /// Matroska/WebM
    Webm,
    /// A still format the `image` crate decodes
    Image(ImageFormat),
    /// Anything else
    Unknown,
}

impl MediaFormat {
    /// Conventional file extension.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            MediaFormat::Webm => Some("webm"),
            MediaFormat::Image(ImageFormat::Jpeg) => Some("jpg"),
            MediaFormat::Image(f) => f.extensions_str().first().copied(),
            MediaFormat::Unknown => None,
        }
    }
}

/// Picks a decoder from the first bytes of a file.
pub fn sniff_format(head: &[u8]) -> MediaFormat {
    if head.starts_with(EBML_MAGIC) {
        return MediaFormat::Webm;
    }
    match image::guess_format(head) {
        Ok(
            f @ (ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::Gif
            | ImageFormat::WebP
            | ImageFormat::Bmp
            | ImageFormat::Tiff),
        ) => MediaFormat::Image(f),
        _ => MediaFormat::Unknown,
    }
}

/// Result of [`decode_media`].
#[derive(Debug, Clone)]
pub enum DecodedMedia {
    /// Video; frame from the first second
    Webm(WebmImage),
    /// Still image
    Still {
        /// Detected format
        format: ImageFormat,
        /// Decoded pixels
        image: DynamicImage,
    },
}

impl DecodedMedia {
    /// The raster used for thumbnails.
    pub fn frame(&self) -> &DynamicImage {
        match self {
            DecodedMedia::Webm(w) => &w.frame,
            DecodedMedia::Still { image, .. } => image,
        }
    }
}

/// Sniffs `reader` and decodes it with the matching backend. The peeked bytes
/// are replayed, so the reader is consumed exactly once.
pub async fn decode_media<R>(prober: &WebmProber, mut reader: R) -> Result<DecodedMedia, MediaError>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut reader).take(SNIFF_LEN as u64).read_to_end(&mut head).await?;

    match sniff_format(&head) {
        MediaFormat::Webm => {
            let webm = prober.decode(Cursor::new(head).chain(reader)).await?;
            Ok(DecodedMedia::Webm(webm))
        }
        MediaFormat::Image(format) => {
            let mut data = head;
            reader.read_to_end(&mut data).await?;
            let image = image::load_from_memory_with_format(&data, format)?;
            tracing::debug!(?format, width = image.width(), height = image.height(), "decoded still");
            Ok(DecodedMedia::Still { format, image })
        }
        MediaFormat::Unknown => Err(MediaError::UnknownFormat),
    }
}
