//! Normalization of audio and video into encodings the network plays back
//! everywhere: OPUS-in-OGG voice notes and H.264/AAC MP4 with fast start.
//!
//! The work is done by a [`TranscodeProvider`]. [`TranscodeEngine::detect`]
//! picks ffmpeg when it answers a version check and a passthrough provider
//! otherwise, so callers never branch on tool presence. Every conversion is
//! best-effort: `None` means "send the original".

mod ffmpeg;
mod passthrough;

pub use {
    ffmpeg::{FfmpegOptions, FfmpegTranscoder},
    passthrough::PassthroughTranscoder,
};

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    courier_common::MediaKind,
    courier_config::TranscodeConfig,
    tracing::{debug, info, warn},
};

use crate::{Result, staging::release_path};

/// Output encodings a provider can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeTarget {
    /// OPUS in an OGG container.
    Audio,
    /// H.264 + AAC in an MP4 container.
    Video,
}

impl TranscodeTarget {
    pub fn for_media(kind: MediaKind) -> Option<Self> {
        match kind {
            MediaKind::Audio => Some(Self::Audio),
            MediaKind::Video => Some(Self::Video),
            MediaKind::Image => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Audio => "ogg",
            Self::Video => "mp4",
        }
    }

    pub fn mimetype(self) -> &'static str {
        match self {
            Self::Audio => "audio/ogg; codecs=opus",
            Self::Video => "video/mp4",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// One conversion: `source` → `output` in the `target` encoding.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub source: PathBuf,
    pub target: TranscodeTarget,
    pub output: PathBuf,
}

impl TranscodeJob {
    /// Build a job with a fresh, unique output path under `scratch_dir`.
    pub fn new(source: &Path, target: TranscodeTarget, scratch_dir: &Path) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "courier_{}_{millis}_{}.{}",
            target.label(),
            &unique[..8],
            target.extension()
        );
        Self {
            source: source.to_path_buf(),
            target,
            output: scratch_dir.join(name),
        }
    }
}

/// A codec backend.
#[async_trait]
pub trait TranscodeProvider: Send + Sync {
    /// Provider identifier (e.g. "ffmpeg").
    fn id(&self) -> &'static str;

    /// Whether the backend can run right now.
    async fn available(&self) -> bool;

    /// Write `job.output`. Errors are reported to the engine, which logs
    /// them and falls back to the original file.
    async fn transcode(&self, job: &TranscodeJob) -> Result<()>;
}

/// A converted file owned by the caller. Deleted when dropped.
#[derive(Debug)]
pub struct TranscodedFile {
    path: Option<PathBuf>,
    target: TranscodeTarget,
}

impl TranscodedFile {
    fn new(path: PathBuf, target: TranscodeTarget) -> Self {
        Self {
            path: Some(path),
            target,
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub fn mimetype(&self) -> &'static str {
        self.target.mimetype()
    }

    /// `original`'s file stem with this file's extension, e.g. `song.mp3`
    /// converted to audio becomes `song.ogg`.
    pub fn display_name(&self, original: &str) -> String {
        let stem = Path::new(original)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(self.target.label());
        format!("{stem}.{}", self.target.extension())
    }

    /// Delete the converted file now.
    pub async fn remove(mut self) {
        if let Some(path) = self.path.take() {
            release_path(&path).await;
        }
    }
}

impl Drop for TranscodedFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "failed to remove transcoded file");
        }
    }
}

/// Whether `path` should be normalized before sending as `kind`.
///
/// Audio that is already OGG/OPUS is sent as-is; video is always
/// normalized; images never are.
pub fn needs_conversion(kind: MediaKind, path: &Path) -> bool {
    match kind {
        MediaKind::Image => false,
        MediaKind::Video => true,
        MediaKind::Audio => {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            ext != "ogg" && ext != "opus"
        },
    }
}

/// Front door for conversions.
#[derive(Clone)]
pub struct TranscodeEngine {
    provider: Arc<dyn TranscodeProvider>,
    scratch_dir: PathBuf,
}

impl std::fmt::Debug for TranscodeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeEngine")
            .field("provider", &self.provider.id())
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl TranscodeEngine {
    pub fn with_provider(provider: Arc<dyn TranscodeProvider>, scratch_dir: PathBuf) -> Self {
        Self {
            provider,
            scratch_dir,
        }
    }

    /// Engine that never converts anything.
    pub fn passthrough() -> Self {
        Self::with_provider(Arc::new(PassthroughTranscoder), std::env::temp_dir())
    }

    /// Use ffmpeg when it is installed and answers `-version`, else passthrough.
    pub async fn detect(config: &TranscodeConfig) -> Self {
        let scratch_dir = config.resolved_scratch_dir();
        if let Some(ffmpeg) = FfmpegTranscoder::locate(config)
            && ffmpeg.available().await
        {
            info!(binary = %ffmpeg.binary().display(), "ffmpeg found, media transcoding enabled");
            return Self::with_provider(Arc::new(ffmpeg), scratch_dir);
        }
        info!("ffmpeg not available, media will be sent unconverted");
        Self::with_provider(Arc::new(PassthroughTranscoder), scratch_dir)
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    pub async fn available(&self) -> bool {
        self.provider.available().await
    }

    /// Re-encode to OPUS/OGG. `None` means "send the original".
    pub async fn convert_audio(&self, source: &Path) -> Option<TranscodedFile> {
        self.run(source, TranscodeTarget::Audio).await
    }

    /// Re-encode to H.264/AAC MP4. `None` means "send the original".
    pub async fn convert_video(&self, source: &Path) -> Option<TranscodedFile> {
        self.run(source, TranscodeTarget::Video).await
    }

    /// Convert `source` for sending as `kind` when it needs it.
    pub async fn convert_for(&self, kind: MediaKind, source: &Path) -> Option<TranscodedFile> {
        if !needs_conversion(kind, source) {
            return None;
        }
        let target = TranscodeTarget::for_media(kind)?;
        self.run(source, target).await
    }

    async fn run(&self, source: &Path, target: TranscodeTarget) -> Option<TranscodedFile> {
        if !self.provider.available().await {
            debug!(provider = self.provider.id(), "transcoder unavailable, skipping");
            return None;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.scratch_dir).await {
            warn!(dir = %self.scratch_dir.display(), error = %e, "cannot create transcode scratch dir");
            return None;
        }

        let job = TranscodeJob::new(source, target, &self.scratch_dir);
        info!(
            provider = self.provider.id(),
            source = %source.display(),
            target = target.label(),
            "transcoding media"
        );

        match self.provider.transcode(&job).await {
            Ok(()) if tokio::fs::try_exists(&job.output).await.unwrap_or(false) => {
                debug!(output = %job.output.display(), "transcode finished");
                Some(TranscodedFile::new(job.output, target))
            },
            Ok(()) => {
                warn!(provider = self.provider.id(), "transcoder produced no output, sending original");
                None
            },
            Err(e) => {
                warn!(provider = self.provider.id(), error = %e, "transcode failed, sending original");
                release_path(&job.output).await;
                None
            },
        }
    }
}
