//! # WebM probe and first-frame extraction
//!
//! The input is read once and fanned out to two child processes: `ffprobe`
//! describes the container, `ffmpeg` renders up to the first second as a
//! stream of PNG frames. The copier and both readers run concurrently and
//! are joined before any result is inspected.
//!
//! ## Error priority after the join
//! 1. Input copy failure
//! 2. ffprobe failure
//! 3. ffmpeg failure
//! 4. Probe validation

use std::collections::BTreeMap;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use pixur_types::ErrorCategory;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::probe::{check_valid_webm, ProbeResponse, ValidationError};

/// Upper bound on frames read from ffmpeg; matches `-frames:v`.
pub const MAX_FRAMES: usize = 120;

/// Bytes of child stderr kept for diagnostics.
const STDERR_TAIL: usize = 4096;

/// Largest PNG chunk accepted from ffmpeg.
const MAX_CHUNK_LEN: usize = 64 * 1024 * 1024;

const COPY_BUF_LEN: usize = 64 * 1024;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

const FFPROBE_ARGS: &[&str] = &[
    "-hide_banner",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
    "-",
];

const FFMPEG_ARGS: &[&str] = &[
    "-hide_banner",
    "-t",
    "1.0",
    "-i",
    "-",
    "-frames:v",
    "120",
    "-codec:v",
    "png",
    "-compression_level",
    "0",
    "-f",
    "image2pipe",
    "-",
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// WebM pipeline failures. Child failures carry the tail of its stderr.
#[derive(Debug, thiserror::Error)]
pub enum WebmError {
    /// The child could not be started
    #[error("failed to start {tool}: {source}")]
    Spawn {
        /// `ffprobe` or `ffmpeg`
        tool: &'static str,
        /// OS error
        source: io::Error,
    },
    /// Reading the upstream input failed
    #[error("failed to read input: {0}")]
    Copy(io::Error),
    /// Reading a child's output or waiting on it failed
    #[error("{tool} pipe failed: {source}")]
    Pipe {
        /// `ffprobe` or `ffmpeg`
        tool: &'static str,
        /// OS error
        source: io::Error,
        /// stderr tail
        debug_info: String,
    },
    /// The child exited unsuccessfully
    #[error("{tool} exited with {status}")]
    ToolFailed {
        /// `ffprobe` or `ffmpeg`
        tool: &'static str,
        /// Exit status text
        status: String,
        /// stderr tail
        debug_info: String,
    },
    /// ffprobe printed something other than the expected JSON
    #[error("bad ffprobe output: {source}")]
    ProbeOutput {
        /// JSON error
        source: serde_json::Error,
        /// stderr tail
        debug_info: String,
    },
    /// A frame from ffmpeg did not decode as PNG
    #[error("bad frame from ffmpeg: {source}")]
    FrameDecode {
        /// Decoder error
        source: image::ImageError,
        /// stderr tail
        debug_info: String,
    },
    /// ffmpeg produced nothing
    #[error("no frames in webm")]
    NoFrames {
        /// stderr tail
        debug_info: String,
    },
    /// The probe result failed validation
    #[error(transparent)]
    Rejected(#[from] ValidationError),
}

impl WebmError {
    /// Captured stderr of the failing child, if any.
    pub fn debug_info(&self) -> Option<&str> {
        match self {
            WebmError::Pipe { debug_info, .. }
            | WebmError::ToolFailed { debug_info, .. }
            | WebmError::ProbeOutput { debug_info, .. }
            | WebmError::FrameDecode { debug_info, .. }
            | WebmError::NoFrames { debug_info } => Some(debug_info),
            WebmError::Spawn { .. } | WebmError::Copy(_) | WebmError::Rejected(_) => None,
        }
    }

    /// Coarse class of the failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            WebmError::Spawn { .. }
            | WebmError::Copy(_)
            | WebmError::Pipe { .. }
            | WebmError::ToolFailed { .. }
            | WebmError::ProbeOutput { .. } => ErrorCategory::ResourceFailure,
            WebmError::FrameDecode { .. } | WebmError::NoFrames { .. } => {
                ErrorCategory::ProducerRejected
            }
            WebmError::Rejected(e) => e.category(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How to invoke one external tool. `prefix_args` go before the pipeline's
/// own arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Executable name or path
    pub program: String,
    /// Arguments placed before the fixed ones
    pub prefix_args: Vec<String>,
}

impl ToolCommand {
    /// Bare program, resolved through `PATH`.
    pub fn new(program: impl Into<String>) -> Self {
        ToolCommand {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    fn spawn(&self, tool: &'static str, args: &[&str]) -> Result<Child, WebmError> {
        tracing::debug!(tool, program = %self.program, "spawning");
        Command::new(&self.program)
            .args(&self.prefix_args)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WebmError::Spawn { tool, source })
    }
}

/// A decoded WebM: its last first-second frame and container facts.
#[derive(Debug, Clone)]
pub struct WebmImage {
    /// Frame for thumbnailing
    pub frame: DynamicImage,
    /// Container duration
    pub duration: Duration,
    /// Container metadata, not comprehensive
    pub tags: BTreeMap<String, String>,
}

/// Runs the probe and convert pipeline.
#[derive(Debug, Clone)]
pub struct WebmProber {
    ffprobe: ToolCommand,
    ffmpeg: ToolCommand,
}

impl Default for WebmProber {
    fn default() -> Self {
        WebmProber {
            ffprobe: ToolCommand::new("ffprobe"),
            ffmpeg: ToolCommand::new("ffmpeg"),
        }
    }
}

impl WebmProber {
    /// Uses the given tool invocations.
    pub fn with_tools(ffprobe: ToolCommand, ffmpeg: ToolCommand) -> Self {
        WebmProber { ffprobe, ffmpeg }
    }

    /// Reads `PIXUR_FFPROBE` and `PIXUR_FFMPEG`, defaulting to the bare names.
    pub fn from_env() -> Self {
        let tool = |var: &str, default: &str| {
            ToolCommand::new(std::env::var(var).unwrap_or_else(|_| default.to_string()))
        };
        WebmProber {
            ffprobe: tool("PIXUR_FFPROBE", "ffprobe"),
            ffmpeg: tool("PIXUR_FFMPEG", "ffmpeg"),
        }
    }

    /// Probes and converts `input`, which is read exactly once.
    ///
    /// Both children are killed when this future completes or is dropped.
    pub async fn decode<R>(&self, input: R) -> Result<WebmImage, WebmError>
    where
        R: AsyncRead + Unpin,
    {
        let mut probe = self.ffprobe.spawn("ffprobe", FFPROBE_ARGS)?;
        let mut convert = self.ffmpeg.spawn("ffmpeg", FFMPEG_ARGS)?;

        let (probe_in, probe_out, probe_err) = take_stdio(&mut probe, "ffprobe")?;
        let (convert_in, convert_out, convert_err) = take_stdio(&mut convert, "ffmpeg")?;

        let (copied, probed, converted) = tokio::join!(
            fan_out(input, [("ffprobe", probe_in), ("ffmpeg", convert_in)]),
            run_probe(&mut probe, probe_out, probe_err),
            run_convert(&mut convert, convert_out, convert_err),
        );

        let copied = copied.map_err(WebmError::Copy)?;
        let resp = probed?;
        let (frame, frames) = converted?;
        tracing::debug!(bytes = copied, frames, "webm pipeline finished");

        let duration = check_valid_webm(&resp)?;
        Ok(WebmImage {
            frame,
            duration,
            tags: resp.format.tags,
        })
    }
}

type Stdio3 = (ChildStdin, ChildStdout, ChildStderr);

fn take_stdio(child: &mut Child, tool: &'static str) -> Result<Stdio3, WebmError> {
    match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
        (Some(stdin), Some(stdout), Some(stderr)) => Ok((stdin, stdout, stderr)),
        _ => Err(WebmError::Spawn {
            tool,
            source: io::Error::other("child stdio not captured"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Copies `input` into every sink. A sink whose child stopped reading is
/// dropped and the rest of the input is discarded for it. Returns the byte
/// count; all sinks are closed on return.
async fn fan_out<R, const N: usize>(
    mut input: R,
    sinks: [(&'static str, ChildStdin); N],
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut sinks: Vec<Option<(&'static str, ChildStdin)>> = sinks.into_iter().map(Some).collect();
    let mut buf = vec![0u8; COPY_BUF_LEN];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        total += n as u64;
        for slot in sinks.iter_mut() {
            let Some((tool, sink)) = slot else { continue };
            if let Err(e) = sink.write_all(&buf[..n]).await {
                tracing::debug!(tool = *tool, error = %e, "child stopped reading input");
                *slot = None;
            }
        }
    }
}

async fn run_probe(
    child: &mut Child,
    mut stdout: ChildStdout,
    stderr: ChildStderr,
) -> Result<ProbeResponse, WebmError> {
    let mut out = Vec::new();
    let (read, debug_info) = tokio::join!(stdout.read_to_end(&mut out), stderr_tail(stderr));
    if let Err(source) = read {
        let _ = child.start_kill();
        return Err(WebmError::Pipe {
            tool: "ffprobe",
            source,
            debug_info,
        });
    }
    wait_success(child, "ffprobe", debug_info.clone()).await?;
    serde_json::from_slice(&out).map_err(|source| WebmError::ProbeOutput { source, debug_info })
}

async fn run_convert(
    child: &mut Child,
    mut stdout: ChildStdout,
    stderr: ChildStderr,
) -> Result<(DynamicImage, usize), WebmError> {
    let (frames, debug_info) = tokio::join!(keep_last_image(&mut stdout), stderr_tail(stderr));
    // Closing our end unblocks ffmpeg if it still has frames to write.
    drop(stdout);
    let frames = match frames {
        Ok(frames) => frames,
        Err(e) => {
            let _ = child.start_kill();
            return Err(match e {
                FrameError::Io(source) => WebmError::Pipe {
                    tool: "ffmpeg",
                    source,
                    debug_info,
                },
                FrameError::Decode(source) => WebmError::FrameDecode { source, debug_info },
            });
        }
    };
    wait_success(child, "ffmpeg", debug_info.clone()).await?;
    frames.ok_or(WebmError::NoFrames { debug_info })
}

async fn wait_success(
    child: &mut Child,
    tool: &'static str,
    debug_info: String,
) -> Result<(), WebmError> {
    let status = match child.wait().await {
        Ok(status) => status,
        Err(source) => {
            return Err(WebmError::Pipe {
                tool,
                source,
                debug_info,
            })
        }
    };
    if !status.success() {
        return Err(WebmError::ToolFailed {
            tool,
            status: status.to_string(),
            debug_info,
        });
    }
    Ok(())
}

/// Drains stderr and keeps the last few kilobytes as text.
async fn stderr_tail(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "stderr read failed");
    }
    let start = buf.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&buf[start..]).into_owned()
}

// ---------------------------------------------------------------------------
// PNG stream splitting
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum FrameError {
    Io(io::Error),
    Decode(image::ImageError),
}

/// Reads concatenated PNGs and keeps the last one that decodes, with the
/// frame count. End of stream, clean or mid-frame, ends the stream.
async fn keep_last_image<R>(r: &mut R) -> Result<Option<(DynamicImage, usize)>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut last = None;
    for count in 1..=MAX_FRAMES {
        let Some(bytes) = read_png_frame(r).await.map_err(FrameError::Io)? else {
            break;
        };
        let frame = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(FrameError::Decode)?;
        last = Some((frame, count));
    }
    Ok(last)
}

/// One PNG file: signature, then chunks through `IEND`. `None` on EOF.
async fn read_png_frame<R>(r: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; PNG_SIGNATURE.len()];
    if !read_or_eof(r, &mut frame).await? {
        return Ok(None);
    }
    if frame != PNG_SIGNATURE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad PNG signature"));
    }
    loop {
        // length, type
        let mut head = [0u8; 8];
        if !read_or_eof(r, &mut head).await? {
            return Ok(None);
        }
        let len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
        if len > MAX_CHUNK_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("PNG chunk of {len} bytes"),
            ));
        }
        frame.extend_from_slice(&head);
        let start = frame.len();
        // data, crc
        frame.resize(start + len + 4, 0);
        if !read_or_eof(r, &mut frame[start..]).await? {
            return Ok(None);
        }
        if &head[4..] == b"IEND" {
            return Ok(Some(frame));
        }
    }
}

async fn read_or_eof<R>(r: &mut R, buf: &mut [u8]) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    match r.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
