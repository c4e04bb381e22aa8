//! # ffprobe result validation
//!
//! Decides whether a probed container is an acceptable WebM.
//!
//! ## Policy
//! - Format name is exactly `matroska,webm`
//! - At least one stream
//! - Duration parses and lies in `(0, 121 s]`
//! - Every stream is vp8/vp9 video or vorbis/opus audio
//! - At least one video stream

use std::collections::BTreeMap;
use std::time::Duration;

use pixur_types::ErrorCategory;
use serde::{Deserialize, Serialize};

/// Two minutes, plus one second of leeway.
pub const MAX_WEBM_DURATION: Duration = Duration::from_secs(60 * 2 + 1);

const WEBM_FORMAT_NAME: &str = "matroska,webm";
const VIDEO_CODECS: &[&str] = &["vp8", "vp9"];
const AUDIO_CODECS: &[&str] = &["vorbis", "opus"];

/// `ffprobe -print_format json -show_format -show_streams` output, reduced to
/// the fields the policy reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// Per-stream records
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    /// Container record
    #[serde(default)]
    pub format: ProbeFormat,
}

/// Container section of the probe output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeFormat {
    /// Comma separated demuxer names
    #[serde(default)]
    pub format_name: String,
    /// Stream count as reported by the demuxer
    #[serde(default)]
    pub nb_streams: i64,
    /// Decimal seconds, e.g. `"12.345000"`
    #[serde(default)]
    pub duration: String,
    /// Container metadata
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Stream section of the probe output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeStream {
    /// `video`, `audio`, `subtitle`, ...
    #[serde(default)]
    pub codec_type: String,
    /// `vp8`, `opus`, ...
    #[serde(default)]
    pub codec_name: String,
    /// Pixel width, video only
    #[serde(default)]
    pub width: i64,
    /// Pixel height, video only
    #[serde(default)]
    pub height: i64,
}

/// Reasons a probe result is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Container is not WebM
    #[error("only webm supported, got {0:?}")]
    NotWebm(String),
    /// Container reports no streams
    #[error("no streams found")]
    NoStreams,
    /// Duration text is not `digits.digits`
    #[error("bad duration {0:?}")]
    BadDuration(String),
    /// Duration is zero or too long
    #[error("invalid duration {0:?}")]
    DurationOutOfRange(Duration),
    /// Video stream in a codec other than vp8/vp9
    #[error("unsupported video type {0:?}")]
    UnsupportedVideo(String),
    /// Audio stream in a codec other than vorbis/opus
    #[error("unsupported audio type {0:?}")]
    UnsupportedAudio(String),
    /// Stream that is neither audio nor video
    #[error("unsupported stream type {codec_type:?} ({codec_name:?})")]
    UnsupportedStream {
        /// Reported stream type
        codec_type: String,
        /// Reported codec
        codec_name: String,
    },
    /// Only audio, or nothing playable
    #[error("no video found")]
    NoVideo,
}

impl ValidationError {
    /// Coarse class of the rejection.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ValidationError::NotWebm(_) => ErrorCategory::MalformedInput,
            ValidationError::UnsupportedVideo(_)
            | ValidationError::UnsupportedAudio(_)
            | ValidationError::UnsupportedStream { .. } => ErrorCategory::Unsupported,
            ValidationError::NoStreams
            | ValidationError::BadDuration(_)
            | ValidationError::DurationOutOfRange(_)
            | ValidationError::NoVideo => ErrorCategory::ProducerRejected,
        }
    }
}

/// Applies the acceptance policy and returns the parsed duration.
pub fn check_valid_webm(resp: &ProbeResponse) -> Result<Duration, ValidationError> {
    if resp.format.format_name != WEBM_FORMAT_NAME {
        return Err(ValidationError::NotWebm(resp.format.format_name.clone()));
    }
    if resp.format.nb_streams <= 0 {
        return Err(ValidationError::NoStreams);
    }
    let duration = parse_duration(&resp.format.duration)?;
    if duration.is_zero() || duration > MAX_WEBM_DURATION {
        return Err(ValidationError::DurationOutOfRange(duration));
    }

    let mut video_found = false;
    for stream in &resp.streams {
        let codec = stream.codec_name.as_str();
        match stream.codec_type.as_str() {
            "video" if VIDEO_CODECS.contains(&codec) => video_found = true,
            "video" => return Err(ValidationError::UnsupportedVideo(codec.to_string())),
            "audio" if AUDIO_CODECS.contains(&codec) => {}
            "audio" => return Err(ValidationError::UnsupportedAudio(codec.to_string())),
            other => {
                return Err(ValidationError::UnsupportedStream {
                    codec_type: other.to_string(),
                    codec_name: codec.to_string(),
                })
            }
        }
    }
    if !video_found {
        return Err(ValidationError::NoVideo);
    }
    Ok(duration)
}

/// Parses ffprobe's `S.U` duration.
///
/// `S` is whole seconds. `U` is read as an integer count of microseconds, so
/// six fractional digits are exact.
pub fn parse_duration(raw: &str) -> Result<Duration, ValidationError> {
    let bad = || ValidationError::BadDuration(raw.to_string());
    let (secs, micros) = raw.split_once('.').ok_or_else(bad)?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(secs) || !digits(micros) {
        return Err(bad());
    }
    let secs: u64 = secs.parse().map_err(|_| bad())?;
    let micros: u64 = micros.parse().map_err(|_| bad())?;
    Duration::from_secs(secs)
        .checked_add(Duration::from_micros(micros))
        .ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(codec_type: &str, codec_name: &str) -> ProbeStream {
        ProbeStream {
            codec_type: codec_type.to_string(),
            codec_name: codec_name.to_string(),
            ..Default::default()
        }
    }

    fn response(streams: Vec<ProbeStream>) -> ProbeResponse {
        ProbeResponse {
            format: ProbeFormat {
                format_name: WEBM_FORMAT_NAME.to_string(),
                nb_streams: streams.len() as i64,
                duration: "1.000000".to_string(),
                tags: BTreeMap::new(),
            },
            streams,
        }
    }

    #[test]
    fn test_bad_format() {
        let mut resp = response(vec![stream("video", "vp8")]);
        resp.format.format_name = "mp4".to_string();
        let err = check_valid_webm(&resp).unwrap_err();
        assert_eq!(err, ValidationError::NotWebm("mp4".to_string()));
        assert_eq!(err.category(), ErrorCategory::MalformedInput);
    }

    #[test]
    fn test_bad_stream_count() {
        let mut resp = response(vec![stream("video", "vp8")]);
        resp.format.nb_streams = 0;
        assert_eq!(check_valid_webm(&resp), Err(ValidationError::NoStreams));
    }

    #[test]
    fn test_bad_duration() {
        let mut resp = response(vec![stream("video", "vp8")]);
        resp.format.duration = "abc".to_string();
        assert!(matches!(
            check_valid_webm(&resp),
            Err(ValidationError::BadDuration(_))
        ));
    }

    #[test]
    fn test_long_duration() {
        let mut resp = response(vec![stream("video", "vp8")]);
        resp.format.duration = "1000.0".to_string();
        assert!(matches!(
            check_valid_webm(&resp),
            Err(ValidationError::DurationOutOfRange(_))
        ));

        resp.format.duration = "121.0".to_string();
        assert!(check_valid_webm(&resp).is_ok());
        resp.format.duration = "121.1".to_string();
        assert!(check_valid_webm(&resp).is_err());
    }

    #[test]
    fn test_zero_duration() {
        let mut resp = response(vec![stream("video", "vp8")]);
        resp.format.duration = "0.000000".to_string();
        assert_eq!(
            check_valid_webm(&resp),
            Err(ValidationError::DurationOutOfRange(Duration::ZERO))
        );
    }

    #[test]
    fn test_bad_video_stream() {
        let resp = response(vec![stream("video", "h264")]);
        let err = check_valid_webm(&resp).unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedVideo("h264".to_string()));
        assert_eq!(err.category(), ErrorCategory::Unsupported);
    }

    #[test]
    fn test_bad_audio_stream() {
        let resp = response(vec![stream("audio", "mp3")]);
        assert_eq!(
            check_valid_webm(&resp),
            Err(ValidationError::UnsupportedAudio("mp3".to_string()))
        );
    }

    #[test]
    fn test_bad_stream_after_video() {
        // Every stream is checked, not just those before the first video.
        let resp = response(vec![stream("video", "vp9"), stream("audio", "aac")]);
        assert_eq!(
            check_valid_webm(&resp),
            Err(ValidationError::UnsupportedAudio("aac".to_string()))
        );
        let resp = response(vec![stream("video", "vp9"), stream("subtitle", "webvtt")]);
        assert!(matches!(
            check_valid_webm(&resp),
            Err(ValidationError::UnsupportedStream { .. })
        ));
    }

    #[test]
    fn test_no_video_stream() {
        let resp = response(vec![stream("audio", "vorbis")]);
        let err = check_valid_webm(&resp).unwrap_err();
        assert_eq!(err, ValidationError::NoVideo);
        assert_eq!(err.category(), ErrorCategory::ProducerRejected);
    }

    #[test]
    fn test_multiple_video_streams() {
        let resp = response(vec![stream("video", "vp8"), stream("video", "vp9")]);
        assert_eq!(check_valid_webm(&resp), Ok(Duration::from_secs(1)));
    }

    #[test]
    fn test_video_and_audio() {
        let resp = response(vec![stream("video", "vp9"), stream("audio", "opus")]);
        assert!(check_valid_webm(&resp).is_ok());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("123.456789"),
            Ok(Duration::from_micros(123_456_789))
        );
        assert_eq!(
            parse_duration("1.5"),
            Ok(Duration::from_secs(1) + Duration::from_micros(5))
        );
        for bad in ["1.1.1", "1", ".1", "1.", "1.9e8", "A.8", "+1.0", "-1.0", ""] {
            assert!(parse_duration(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_probe_json_shape() {
        let json = r#"{
            "streams": [{"index": 0, "codec_name": "vp9", "codec_type": "video", "width": 640, "height": 360}],
            "format": {"format_name": "matroska,webm", "nb_streams": 1, "duration": "2.500000",
                       "tags": {"ENCODER": "Lavf58"}}
        }"#;
        let resp: ProbeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.streams[0].width, 640);
        assert_eq!(resp.format.tags["ENCODER"], "Lavf58");
        assert_eq!(check_valid_webm(&resp), Ok(Duration::from_millis(2500)));
    }
}
