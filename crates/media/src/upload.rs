//! Client-side preparation of a local file for `/send-message`.

use std::path::Path;

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    courier_common::MediaKind,
    tracing::{debug, info},
};

use crate::{
    Error, Result,
    error::Context,
    mime,
    transcode::{TranscodeEngine, TranscodedFile},
};

/// A local file read into memory, possibly after conversion.
#[derive(Debug)]
pub struct PreparedUpload {
    pub data: Vec<u8>,
    /// Resolved from the file actually being sent.
    pub mimetype: String,
    /// Basename of the file the user pointed at, even when converted.
    pub filename: String,
    pub filesize: u64,
    pub transcoded: bool,
    guard: Option<TranscodedFile>,
}

impl PreparedUpload {
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// Delete the converted temp file, if any.
    pub async fn finish(mut self) {
        if let Some(converted) = self.guard.take() {
            converted.remove().await;
        }
    }
}

/// Read `path` for sending as `kind`, converting audio and video through
/// `engine` when they need it. Conversion failure falls back to the
/// original bytes.
pub async fn prepare_local_file(
    engine: &TranscodeEngine,
    path: &Path,
    kind: MediaKind,
) -> Result<PreparedUpload> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(Error::invalid_input(format!(
            "file '{}' not found",
            path.display()
        )));
    }

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("media")
        .to_string();

    let converted = engine.convert_for(kind, path).await;
    let send_path = converted.as_ref().map_or(path, |c| c.path());

    let data = tokio::fs::read(send_path)
        .await
        .with_context(|| format!("failed to read {}", send_path.display()))?;
    let mimetype = match &converted {
        Some(c) => c.mimetype().to_string(),
        None => mime::mime_for_path(send_path, kind),
    };

    if converted.is_some() {
        info!(file = %filename, bytes = data.len(), "using converted media");
    } else {
        debug!(file = %filename, bytes = data.len(), "sending original media");
    }

    Ok(PreparedUpload {
        filesize: data.len() as u64,
        transcoded: converted.is_some(),
        data,
        mimetype,
        filename,
        guard: converted,
    })
}
