//! Semantic validation of a loaded configuration.

use std::path::{Path, PathBuf};

use crate::schema::CourierConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "server.port"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Check a config for values that would break or degrade the relay.
pub fn validate(config: &CourierConfig, config_path: Option<&Path>) -> ValidationResult {
    let mut result = ValidationResult {
        diagnostics: Vec::new(),
        config_path: config_path.map(Path::to_path_buf),
    };

    if config.server.port == 0 {
        result.push(
            Severity::Warning,
            "server.port",
            "port 0 binds a random port; CLI clients will not find the server",
        );
    }
    if config.server.body_limit_mb == 0 {
        result.push(
            Severity::Error,
            "server.body_limit_mb",
            "body limit of 0 rejects every request",
        );
    } else if config.server.body_limit_mb < 16 {
        result.push(
            Severity::Info,
            "server.body_limit_mb",
            "inline media is base64-encoded; small limits reject most videos",
        );
    }
    if config.server.bind != "127.0.0.1" && config.server.bind != "localhost" {
        result.push(
            Severity::Warning,
            "server.bind",
            "the relay has no authentication; binding beyond loopback exposes it",
        );
    }

    if !(6..=510).contains(&config.transcode.audio_bitrate_kbps) {
        result.push(
            Severity::Error,
            "transcode.audio_bitrate_kbps",
            "opus supports 6 to 510 kbit/s",
        );
    }
    if config.transcode.video_max_width < 2 || config.transcode.video_max_width % 2 != 0 {
        result.push(
            Severity::Error,
            "transcode.video_max_width",
            "H.264 with yuv420p needs a positive, even width",
        );
    }
    if config.transcode.video_crf > 51 {
        result.push(
            Severity::Error,
            "transcode.video_crf",
            "libx264 CRF must be between 0 and 51",
        );
    }
    if let Some(path) = config.transcode.ffmpeg_path.as_deref()
        && !Path::new(path).exists()
    {
        result.push(
            Severity::Warning,
            "transcode.ffmpeg_path",
            format!("{path} does not exist; transcoding will be skipped"),
        );
    }

    if config.whatsapp.request_timeout_secs == 0 {
        result.push(
            Severity::Error,
            "whatsapp.request_timeout_secs",
            "a zero timeout fails every send",
        );
    }
    if config.whatsapp.sidecar_port == config.server.port {
        result.push(
            Severity::Error,
            "whatsapp.sidecar_port",
            "sidecar and HTTP server cannot share a port",
        );
    }

    result
}
