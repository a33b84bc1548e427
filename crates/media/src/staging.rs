//! Scratch-space staging for inbound media.
//!
//! Large payloads arrive base64-encoded inside JSON. They are decoded once
//! and written to a uniquely named file so the session can stream them from
//! disk instead of holding encoded blobs in memory.
//!
//! [`StagedMedia`] owns the file it describes. Release it explicitly with
//! [`StagedMedia::release`] once the send is done; if the guard is dropped
//! instead (error, panic, cancelled future) the file is removed in `Drop`.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    base64::{
        Engine,
        alphabet,
        engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    },
    bytes::Bytes,
    courier_channels::MediaHandle,
    tracing::{debug, warn},
};

use crate::{
    error::{Context, Error, Result},
    mime::extension_for_mime,
};

/// Standard alphabet, padding optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Suffix for files that are still being written.
const PARTIAL_SUFFIX: &str = ".part";

/// Staged files younger than this are assumed to belong to a live send.
pub const SWEEP_MIN_AGE: Duration = Duration::from_secs(15 * 60);

/// Raw input to [`StagingStore::stage`].
#[derive(Debug, Clone)]
pub enum StagePayload {
    /// Base64 text, optionally with a `data:<mime>;base64,` prefix.
    Base64(String),
    /// Already-decoded bytes.
    Bytes(Bytes),
}

/// Manages the scratch directory for staged payloads.
#[derive(Debug, Clone)]
pub struct StagingStore {
    dir: PathBuf,
}

impl StagingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode `payload` and write it to a fresh file in the scratch directory.
    ///
    /// `suggested_name` becomes the handle's display filename after
    /// sanitizing; the on-disk name always carries a unique prefix so two
    /// concurrent stages of `photo.jpg` never collide.
    pub async fn stage(
        &self,
        payload: StagePayload,
        mimetype: &str,
        suggested_name: Option<&str>,
    ) -> Result<StagedMedia> {
        let data = decode_payload(payload).await?;
        if data.is_empty() {
            return Err(Error::invalid_input("media payload is empty"));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create staging dir {}", self.dir.display()))?;

        let filename = suggested_name
            .map(sanitize_filename)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| generated_name(mimetype));
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!("{unique}-{filename}"));
        let partial = self.dir.join(format!(".{unique}{PARTIAL_SUFFIX}"));

        if let Err(e) = write_atomically(&partial, &path, &data).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        debug!(path = %path.display(), size = data.len(), mimetype, "staged media");

        Ok(StagedMedia {
            path: Some(path),
            mimetype: mimetype.to_string(),
            filename,
            size: data.len() as u64,
        })
    }

    /// Remove staged files left behind by an earlier run, e.g. after a crash.
    /// Returns the number of files removed.
    ///
    /// Only names produced by [`StagingStore::stage`] are touched, and only
    /// once they are older than [`SWEEP_MIN_AGE`], so a shared directory or a
    /// second instance's in-flight sends are left alone.
    pub async fn sweep(&self) -> Result<usize> {
        self.sweep_older_than(SWEEP_MIN_AGE).await
    }

    pub async fn sweep_older_than(&self, min_age: Duration) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::external("failed to read staging dir", e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to read staging dir entry")?
        {
            if !entry.file_name().to_str().is_some_and(is_staged_name) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if !meta.is_file() || age < min_age {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to sweep staged file"),
            }
        }
        Ok(removed)
    }
}

/// `<32 hex>-<name>` or `.<32 hex>.part`, the two shapes `stage` writes.
fn is_staged_name(name: &str) -> bool {
    let is_id = |id: &str| id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit());
    if let Some(partial) = name.strip_prefix('.')
        && let Some(id) = partial.strip_suffix(PARTIAL_SUFFIX)
    {
        return is_id(id);
    }
    match name.split_once('-') {
        Some((id, rest)) => is_id(id) && !rest.is_empty(),
        None => false,
    }
}

/// A payload written to the scratch directory.
#[derive(Debug)]
pub struct StagedMedia {
    path: Option<PathBuf>,
    mimetype: String,
    filename: String,
    size: u64,
}

impl StagedMedia {
    /// Borrowed handle for the session. Valid until this guard is released.
    pub fn handle(&self) -> MediaHandle<'_> {
        MediaHandle::File {
            path: self.path(),
            mimetype: &self.mimetype,
            filename: &self.filename,
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Delete the backing file. Failures are logged, never returned.
    pub async fn release(mut self) {
        if let Some(path) = self.path.take() {
            release_path(&path).await;
        }
    }
}

impl Drop for StagedMedia {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "released staged media on drop"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => warn!(path = %path.display(), error = %e, "failed to release staged media"),
            }
        }
    }
}

/// Delete a file if it still exists. Safe to call repeatedly.
pub async fn release_path(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "released staged media"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "failed to release staged media"),
    }
}

async fn write_atomically(partial: &Path, dest: &Path, data: &[u8]) -> Result<()> {
    tokio::fs::write(partial, data)
        .await
        .with_context(|| format!("failed to write {}", partial.display()))?;
    tokio::fs::rename(partial, dest)
        .await
        .with_context(|| format!("failed to move staged file to {}", dest.display()))
}

async fn decode_payload(payload: StagePayload) -> Result<Bytes> {
    match payload {
        StagePayload::Bytes(bytes) => Ok(bytes),
        StagePayload::Base64(text) => tokio::task::spawn_blocking(move || decode_base64(&text))
            .await
            .map_err(|e| Error::external("base64 decode task failed", e))?,
    }
}

fn decode_base64(text: &str) -> Result<Bytes> {
    let body = match text.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => text,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT_BASE64
        .decode(compact.as_bytes())
        .map(Bytes::from)
        .map_err(|e| Error::invalid_input(format!("media data is not valid base64: {e}")))
}

/// Keep only `[A-Za-z0-9._-]` and strip leading dots. May return "".
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let sanitized: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    sanitized.trim_start_matches('.').to_string()
}

fn generated_name(mimetype: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("media_{millis}.{}", extension_for_mime(mimetype))
}
