use std::path::Path;

use {async_trait::async_trait, courier_common::MediaKind, serde::Serialize};

use crate::Result;

/// A destination the session can post to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    /// Network-level identifier (e.g. `1203...@newsletter`).
    pub id: String,
    pub name: String,
}

/// Borrowed reference to a payload that is ready for transmission.
///
/// A `File` handle never owns its backing file: whoever staged it is
/// responsible for releasing it once the send has finished.
#[derive(Debug, Clone, Copy)]
pub enum MediaHandle<'a> {
    File {
        path: &'a Path,
        mimetype: &'a str,
        filename: &'a str,
    },
    Buffer {
        data: &'a [u8],
        mimetype: &'a str,
        filename: Option<&'a str>,
    },
}

impl MediaHandle<'_> {
    pub fn mimetype(&self) -> &str {
        match self {
            Self::File { mimetype, .. } | Self::Buffer { mimetype, .. } => mimetype,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::File { filename, .. } => Some(filename),
            Self::Buffer { filename, .. } => *filename,
        }
    }
}

/// Per-kind send options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOptions {
    Image { caption: String },
    Video { caption: String },
    Audio { as_voice_note: bool },
}

impl SendOptions {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Image { .. } => MediaKind::Image,
            Self::Video { .. } => MediaKind::Video,
            Self::Audio { .. } => MediaKind::Audio,
        }
    }

    /// Defaults: empty caption, audio sent as a voice note.
    pub fn for_kind(kind: MediaKind, caption: Option<String>, as_voice_note: Option<bool>) -> Self {
        match kind {
            MediaKind::Image => Self::Image {
                caption: caption.unwrap_or_default(),
            },
            MediaKind::Video => Self::Video {
                caption: caption.unwrap_or_default(),
            },
            MediaKind::Audio => Self::Audio {
                as_voice_note: as_voice_note.unwrap_or(true),
            },
        }
    }
}

/// The authenticated connection to the messaging network.
///
/// Implementations must tolerate concurrent calls; no ordering between sends
/// is implied.
#[async_trait]
pub trait ChannelSession: Send + Sync {
    /// Network identifier (e.g. "whatsapp-web").
    fn id(&self) -> &str;

    /// Channels currently visible to the session.
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;

    async fn send_text(&self, channel: &ChannelInfo, text: &str) -> Result<()>;

    async fn send_media(
        &self,
        channel: &ChannelInfo,
        media: MediaHandle<'_>,
        options: &SendOptions,
    ) -> Result<()>;
}

/// Case-insensitive exact match on the channel name. First match wins.
pub fn find_channel<'a>(channels: &'a [ChannelInfo], name: &str) -> Option<&'a ChannelInfo> {
    let wanted = name.to_lowercase();
    channels.iter().find(|ch| ch.name.to_lowercase() == wanted)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<ChannelInfo> {
        vec![
            ChannelInfo {
                id: "1@newsletter".into(),
                name: "Test Channel".into(),
            },
            ChannelInfo {
                id: "2@newsletter".into(),
                name: "Ünïcode News".into(),
            },
        ]
    }

    #[test]
    fn matches_ignoring_case() {
        let list = channels();
        assert_eq!(find_channel(&list, "test channel").unwrap().id, "1@newsletter");
        assert_eq!(find_channel(&list, "TEST CHANNEL").unwrap().id, "1@newsletter");
        assert_eq!(find_channel(&list, "ünïcode news").unwrap().id, "2@newsletter");
    }

    #[test]
    fn no_fuzzy_matching() {
        let list = channels();
        assert!(find_channel(&list, "Test").is_none());
        assert!(find_channel(&list, "Test Channel ").is_none());
        assert!(find_channel(&list, "Ghost Channel").is_none());
    }

    #[test]
    fn option_defaults() {
        assert_eq!(
            SendOptions::for_kind(MediaKind::Audio, None, None),
            SendOptions::Audio {
                as_voice_note: true
            }
        );
        assert_eq!(
            SendOptions::for_kind(MediaKind::Image, None, Some(false)),
            SendOptions::Image {
                caption: String::new()
            }
        );
        assert_eq!(
            SendOptions::for_kind(MediaKind::Video, Some("watch".into()), None).kind(),
            MediaKind::Video
        );
    }

    #[test]
    fn handle_accessors() {
        let path = Path::new("/tmp/x.png");
        let handle = MediaHandle::File {
            path,
            mimetype: "image/png",
            filename: "x.png",
        };
        assert_eq!(handle.mimetype(), "image/png");
        assert_eq!(handle.filename(), Some("x.png"));

        let buffer = MediaHandle::Buffer {
            data: b"abc",
            mimetype: "audio/mpeg",
            filename: None,
        };
        assert_eq!(buffer.filename(), None);
    }
}
