use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::TransformOptions;
use crate::error::ProcessingError;
use crate::models::render;

const MIN_WIDTH: u32 = 16;
const MAX_WIDTH: u32 = 7680;
const MIN_HEIGHT: u32 = 16;
const MAX_HEIGHT: u32 = 4320;

/// How the mark is burnt into video frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStrategy {
    /// Render the image overlay once and composite it onto every frame.
    #[default]
    Overlay,
    /// Let ffmpeg draw a grid of text instances itself.
    DrawText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// `None` when outside the accepted frame range.
    pub fn checked(width: u32, height: u32) -> Option<Self> {
        ((MIN_WIDTH..=MAX_WIDTH).contains(&width) && (MIN_HEIGHT..=MAX_HEIGHT).contains(&height))
            .then_some(Self { width, height })
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

pub fn parse_probe_json(raw: &str) -> Option<Dimensions> {
    let probe: ProbeOutput = serde_json::from_str(raw).ok()?;
    probe
        .streams
        .iter()
        .find_map(|s| Dimensions::checked(s.width?, s.height?))
}

static WXH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2,5})x(\d{2,5})\b").expect("invalid WxH regex"));

/// Find `WxH` in ffmpeg's diagnostic output, looking at `Video:` stream lines
/// before anything else.
pub fn parse_dimensions_text(text: &str) -> Option<Dimensions> {
    let scan = |line: &str| {
        WXH.captures_iter(line).find_map(|c| {
            let w = c[1].parse().ok()?;
            let h = c[2].parse().ok()?;
            Dimensions::checked(w, h)
        })
    };
    text.lines()
        .filter(|l| l.contains("Video:"))
        .find_map(scan)
        .or_else(|| text.lines().find_map(scan))
}

pub(crate) fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(sig)) => format!("signal {sig}"),
        _ => "unknown status".to_string(),
    }
}

/// Last `max` bytes of `bytes`, lossily decoded.
pub(crate) fn tail(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

fn spawn_error(tool: &str, err: std::io::Error) -> ProcessingError {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            ProcessingError::ToolMissing {
                tool: tool.to_string(),
                detail: err.to_string(),
            }
        }
        _ => ProcessingError::Io(err),
    }
}

async fn capture(bin: &str, args: &[String]) -> Result<std::process::Output, ProcessingError> {
    debug!(bin, ?args, "Running tool");
    Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(bin, e))
}

/// Run a tool to completion; non-zero exit is `ToolFailed`.
pub async fn run_tool(
    bin: &str,
    args: &[String],
    diag_tail_bytes: usize,
) -> Result<Vec<u8>, ProcessingError> {
    let output = capture(bin, args).await?;
    if !output.status.success() {
        return Err(ProcessingError::ToolFailed {
            tool: bin.to_string(),
            status: describe_status(output.status),
            stderr_tail: tail(&output.stderr, diag_tail_bytes),
        });
    }
    Ok(output.stdout)
}

async fn probe_with_ffprobe(
    input: &Path,
    opts: &TransformOptions,
) -> Result<Dimensions, ProcessingError> {
    let args = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "json",
    ]
    .into_iter()
    .map(String::from)
    .chain(std::iter::once(input.to_string_lossy().into_owned()))
    .collect::<Vec<_>>();

    let stdout = run_tool(&opts.video.ffprobe_bin, &args, opts.video.diag_tail_bytes).await?;
    parse_probe_json(&String::from_utf8_lossy(&stdout)).ok_or_else(|| {
        ProcessingError::Dimensions("ffprobe reported no usable video stream".into())
    })
}

/// Frame size of `input`: ffprobe first, then ffmpeg's stream banner.
pub async fn probe_dimensions(
    input: &Path,
    opts: &TransformOptions,
) -> Result<Dimensions, ProcessingError> {
    match probe_with_ffprobe(input, opts).await {
        Ok(dims) => return Ok(dims),
        Err(e) => warn!(error = %e, "ffprobe gave no dimensions, scanning ffmpeg output"),
    }

    // `ffmpeg -i` without an output always exits non-zero; only stderr matters.
    let args = vec![
        "-hide_banner".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
    ];
    let output = capture(&opts.video.ffmpeg_bin, &args).await?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    parse_dimensions_text(&stderr).ok_or_else(|| {
        ProcessingError::Dimensions(format!(
            "no frame size in ffmpeg output: {}",
            tail(&output.stderr, opts.video.diag_tail_bytes)
        ))
    })
}

pub fn overlay_filter() -> &'static str {
    "[0:v][1:v]overlay=0:0:format=auto,format=yuv420p[v]"
}

/// Escape for a single-quoted drawtext `text` value inside a filtergraph.
pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\\\\\")
        .replace('\'', "'\\\\''")
        .replace(':', "\\\\:")
        .replace('%', "\\\\%")
}

pub fn drawtext_filter(text: &str, grid: u32, animate: bool) -> String {
    let text = escape_drawtext(text);
    let grid = grid.max(1);
    let mut filters = Vec::with_capacity((grid * grid + 1) as usize);

    for row in 0..grid {
        for col in 0..grid {
            let fx = col as f64 * 1.2 / grid as f64;
            let fy = row as f64 * 1.2 / grid as f64;
            filters.push(format!(
                "drawtext=text='{text}':fontsize=20:fontcolor=white@0.3:x=(w*{fx:.4}):y=(h*{fy:.4})"
            ));
        }
    }

    let (x, y) = if animate {
        (
            "(w-text_w)/2+(w/8)*sin(t/3)",
            "(h-text_h)/2+(h/8)*cos(t/4)",
        )
    } else {
        ("(w-text_w)/2", "(h-text_h)/2")
    };
    filters.push(format!(
        "drawtext=text='{text}':fontsize=24:fontcolor=cyan@0.6:borderw=1:bordercolor=black@0.4:x={x}:y={y}"
    ));

    format!("[0:v]{},format=yuv420p[v]", filters.join(","))
}

fn encode_args(opts: &TransformOptions, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-map".into(),
        "[v]".into(),
        "-map".into(),
        "0:a?".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        opts.video.preset.clone(),
        "-crf".into(),
        opts.video.crf.to_string(),
        "-c:a".into(),
        "copy".into(),
    ];
    if let Some(threads) = opts.video.threads {
        args.push("-threads".into());
        args.push(threads.to_string());
    }
    args.push("-movflags".into());
    args.push("+faststart".into());
    // The task directory's output file has no extension to infer a muxer from.
    args.push("-f".into());
    args.push("mp4".into());
    args.push("-y".into());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Full ffmpeg argument list for one transcode.
pub fn transcode_args(
    input: &Path,
    overlay: Option<&Path>,
    filter: &str,
    opts: &TransformOptions,
    output: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
    ];
    if let Some(overlay) = overlay {
        args.push("-i".into());
        args.push(overlay.to_string_lossy().into_owned());
    }
    args.push("-filter_complex".into());
    args.push(filter.to_string());
    args.extend(encode_args(opts, output));
    args
}

/// Burn `text` into the video at `input`, writing an MP4 to `output`.
/// Intermediate files go to `work_dir`.
pub async fn watermark_video(
    input: &Path,
    output: &Path,
    text: &str,
    opts: &TransformOptions,
    work_dir: &Path,
) -> Result<Dimensions, ProcessingError> {
    let dims = probe_dimensions(input, opts).await?;
    debug!(width = dims.width, height = dims.height, "Probed video");

    let args = match opts.video.strategy {
        VideoStrategy::Overlay => {
            let overlay = work_dir.join("overlay.png");
            let overlay_path = overlay.clone();
            let text = text.to_string();
            let placement = opts.emphasis;
            tokio::task::spawn_blocking(move || {
                render::write_overlay_png(&overlay_path, dims.width, dims.height, &text, placement)
            })
            .await
            .map_err(|e| ProcessingError::Io(std::io::Error::other(e)))??;
            transcode_args(input, Some(&overlay), overlay_filter(), opts, output)
        }
        VideoStrategy::DrawText => {
            let filter = drawtext_filter(text, opts.video.grid, opts.video.animate_emphasis);
            transcode_args(input, None, &filter, opts, output)
        }
    };

    run_tool(&opts.video.ffmpeg_bin, &args, opts.video.diag_tail_bytes).await?;
    Ok(dims)
}
