//! Extension ↔ MIME type mapping for the media kinds the network accepts.
//!
//! Lookups never fail. An unknown extension yields `"<kind>/<ext>"`, which is
//! syntactically a MIME type but may not name a real subtype; treat it as a
//! hint, not an authoritative answer.

use std::path::Path;

use courier_common::MediaKind;

/// Known extensions (lowercase, without the dot).
const MIME_TABLE: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg; codecs=opus"),
    ("opus", "audio/ogg; codecs=opus"),
    ("wav", "audio/wav"),
    ("m4a", "audio/mp4"),
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
];

/// Resolve a path (`clip.MOV`), dotted extension (`.mov`) or bare extension
/// (`mov`) to a MIME type, guessing `"<fallback>/<ext>"` when unknown.
pub fn resolve(path_or_ext: &str, fallback: MediaKind) -> String {
    let ext = match path_or_ext.strip_prefix('.') {
        Some(bare) if !bare.contains(['.', '/', '\\']) => bare,
        _ if path_or_ext.contains(['.', '/', '\\']) => Path::new(path_or_ext)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default(),
        _ => path_or_ext,
    };
    mime_for_extension(ext, fallback)
}

/// MIME type for a file path, by extension.
pub fn mime_for_path(path: &Path, fallback: MediaKind) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    resolve(ext, fallback)
}

/// MIME type for an extension with or without a leading dot.
pub fn mime_for_extension(ext: &str, fallback: MediaKind) -> String {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    MIME_TABLE
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| (*mime).to_string())
        .unwrap_or_else(|| format!("{}/{ext}", fallback.as_str()))
}

/// File extension for a MIME type (parameters after `;` are ignored).
/// Returns `"bin"` for anything unrecognised.
pub fn extension_for_mime(mimetype: &str) -> &'static str {
    let base = mimetype.split(';').next().unwrap_or(mimetype).trim();
    match base.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mp4" | "audio/m4a" | "audio/aac" => "m4a",
        "video/mp4" => "mp4",
        "video/x-msvideo" => "avi",
        "video/quicktime" => "mov",
        "video/webm" | "audio/webm" => "webm",
        "video/x-matroska" => "mkv",
        _ => "bin",
    }
}
