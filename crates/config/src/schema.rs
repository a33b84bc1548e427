/// Config schema types (server, media staging, transcoding, whatsapp sidecar).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub transcode: TranscodeConfig,
    pub whatsapp: WhatsAppConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
    /// Maximum accepted request body, in megabytes. Inline media travels as
    /// base64 inside the JSON body, so this bounds the largest sendable file.
    pub body_limit_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3000,
            body_limit_mb: 50,
        }
    }
}

impl ServerConfig {
    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb.saturating_mul(1024 * 1024)
    }
}

/// Staging of inbound media payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Scratch directory for staged payloads. `None` resolves to
    /// `<data dir>/temp_media`.
    pub staging_dir: Option<PathBuf>,
    /// Normalize staged audio/video with the transcoder before sending.
    pub transcode_on_ingest: bool,
}

impl MediaConfig {
    pub fn resolved_staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("temp_media"))
    }
}

/// External codec tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Explicit ffmpeg binary. Searched in PATH when unset.
    pub ffmpeg_path: Option<String>,
    /// Where converted files are written. OS temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub audio_bitrate_kbps: u32,
    pub video_max_width: u32,
    pub video_crf: u8,
    pub video_audio_bitrate_kbps: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            scratch_dir: None,
            audio_bitrate_kbps: 64,
            video_max_width: 1280,
            video_crf: 26,
            video_audio_bitrate_kbps: 128,
        }
    }
}

impl TranscodeConfig {
    pub fn resolved_scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// WhatsApp Web sidecar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Port the sidecar's WebSocket server listens on.
    pub sidecar_port: u16,
    /// Directory containing the sidecar's `package.json`.
    pub sidecar_dir: Option<PathBuf>,
    /// Where the sidecar persists login credentials.
    pub auth_dir: Option<PathBuf>,
    /// Spawn and supervise the sidecar process. Disable to run it by hand.
    pub auto_start: bool,
    /// Account label passed to the sidecar on login.
    pub account_id: String,
    /// Seconds to wait for a sidecar reply before failing a request.
    pub request_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            sidecar_port: 3600,
            sidecar_dir: None,
            auth_dir: None,
            auto_start: true,
            account_id: "default".into(),
            request_timeout_secs: 120,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CourierConfig::default();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.server.body_limit_bytes(), 50 * 1024 * 1024);
        assert_eq!(cfg.transcode.audio_bitrate_kbps, 64);
        assert_eq!(cfg.transcode.video_max_width, 1280);
        assert!(!cfg.media.transcode_on_ingest);
        assert!(cfg.whatsapp.auto_start);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: CourierConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [media]
            transcode_on_ingest = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert!(cfg.media.transcode_on_ingest);
        assert_eq!(cfg.whatsapp.sidecar_port, 3600);
    }

    #[test]
    fn explicit_staging_dir_wins() {
        let media = MediaConfig {
            staging_dir: Some(PathBuf::from("/var/tmp/courier")),
            transcode_on_ingest: false,
        };
        assert_eq!(
            media.resolved_staging_dir(),
            PathBuf::from("/var/tmp/courier")
        );
    }
}
