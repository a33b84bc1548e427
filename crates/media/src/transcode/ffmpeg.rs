//! ffmpeg-backed transcoder.
//!
//! Runs the system `ffmpeg` binary as a child process; nothing is linked.
//! The child is killed if the owning future is dropped.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use {
    async_trait::async_trait,
    courier_config::TranscodeConfig,
    tokio::{process::Command, sync::OnceCell},
};

use super::{TranscodeJob, TranscodeProvider, TranscodeTarget};
use crate::{Error, Result};

const BINARY_NAME: &str = "ffmpeg";

/// Only the tail of stderr is kept in errors.
const STDERR_TAIL_BYTES: usize = 2048;

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegOptions {
    pub audio_bitrate_kbps: u32,
    pub video_max_width: u32,
    pub video_crf: u8,
    pub video_audio_bitrate_kbps: u32,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self::from(&TranscodeConfig::default())
    }
}

impl From<&TranscodeConfig> for FfmpegOptions {
    fn from(config: &TranscodeConfig) -> Self {
        Self {
            audio_bitrate_kbps: config.audio_bitrate_kbps,
            video_max_width: config.video_max_width,
            video_crf: config.video_crf,
            video_audio_bitrate_kbps: config.video_audio_bitrate_kbps,
        }
    }
}

/// Transcoder that shells out to ffmpeg.
#[derive(Debug)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
    options: FfmpegOptions,
    version_ok: OnceCell<bool>,
}

impl FfmpegTranscoder {
    pub fn new(binary: PathBuf, options: FfmpegOptions) -> Self {
        Self {
            binary,
            options,
            version_ok: OnceCell::new(),
        }
    }

    /// Find ffmpeg at the configured path, falling back to `PATH`.
    pub fn locate(config: &TranscodeConfig) -> Option<Self> {
        let explicit = config
            .ffmpeg_path
            .as_deref()
            .map(PathBuf::from)
            .filter(|p| p.is_file());
        let binary = explicit.or_else(|| which::which(BINARY_NAME).ok())?;
        Some(Self::new(binary, FfmpegOptions::from(config)))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Arguments for `job`, without the binary itself.
    pub fn args(&self, job: &TranscodeJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(job.source.clone().into_os_string());

        let codec_args = match job.target {
            TranscodeTarget::Audio => vec![
                "-vn".to_string(),
                "-c:a".into(),
                "libopus".into(),
                "-b:a".into(),
                format!("{}k", self.options.audio_bitrate_kbps),
                "-vbr".into(),
                "on".into(),
                "-compression_level".into(),
                "10".into(),
                "-frame_duration".into(),
                "60".into(),
                "-application".into(),
                "voip".into(),
            ],
            TranscodeTarget::Video => vec![
                "-c:v".to_string(),
                "libx264".into(),
                "-preset".into(),
                "fast".into(),
                "-crf".into(),
                self.options.video_crf.to_string(),
                "-vf".into(),
                format!(
                    "scale='min({},iw)':-2,format=yuv420p",
                    self.options.video_max_width
                ),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                format!("{}k", self.options.video_audio_bitrate_kbps),
                "-movflags".into(),
                "+faststart".into(),
            ],
        };
        args.extend(codec_args.into_iter().map(OsString::from));
        args.push(job.output.clone().into_os_string());
        args
    }
}

#[async_trait]
impl TranscodeProvider for FfmpegTranscoder {
    fn id(&self) -> &'static str {
        "ffmpeg"
    }

    /// `ffmpeg -version`, checked once per transcoder.
    async fn available(&self) -> bool {
        *self
            .version_ok
            .get_or_init(|| async {
                Command::new(&self.binary)
                    .arg("-version")
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status()
                    .await
                    .is_ok_and(|status| status.success())
            })
            .await
    }

    async fn transcode(&self, job: &TranscodeJob) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(self.args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::external("failed to run ffmpeg", e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
        let start = (start..stderr.len())
            .find(|i| stderr.is_char_boundary(*i))
            .unwrap_or(stderr.len());
        Err(Error::ToolFailed {
            tool: BINARY_NAME.into(),
            status: output.status.to_string(),
            stderr: stderr[start..].trim().to_string(),
        })
    }
}
