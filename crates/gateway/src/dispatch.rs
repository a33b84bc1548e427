//! The send pipeline: gate → validate → resolve → stage → send → release.
//!
//! [`MessageDispatcher`] holds no state of its own. Every request runs the
//! same linear sequence and nothing is retried. Staged files are released on
//! every exit path: explicitly after the send, and by the guard's `Drop` if
//! the future is cancelled or unwinds.

use std::{
    error::Error as StdError,
    path::PathBuf,
    sync::Arc,
};

use {
    axum::http::StatusCode,
    courier_channels::{
        ChannelInfo, ChannelSession, DispatchGate, MediaHandle, SendOptions, find_channel,
    },
    courier_common::{MediaKind, MessageKind},
    courier_media::{StagePayload, StagingStore, TranscodeEngine, mime},
    tracing::{debug, info, warn},
};

pub const NOT_READY_MESSAGE: &str = "WhatsApp client is not ready. Please wait or scan QR code.";

/// Where a media payload comes from.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Base64 text as received over HTTP.
    Base64(String),
    /// A file on this host. Not staged and never deleted by the dispatcher.
    LocalFile(PathBuf),
}

/// An unvalidated send request.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub channel_name: String,
    pub message_type: String,
    pub text: Option<String>,
    pub media: Option<MediaSource>,
    pub mimetype: Option<String>,
    pub filename: Option<String>,
    pub caption: Option<String>,
    pub as_voice_note: Option<bool>,
}

impl SendRequest {
    pub fn media(
        channel_name: impl Into<String>,
        kind: MediaKind,
        source: MediaSource,
        mimetype: Option<String>,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            message_type: kind.as_str().into(),
            media: Some(source),
            mimetype,
            ..Self::default()
        }
    }
}

/// Successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    /// Name as the caller wrote it.
    pub requested_name: String,
    /// `messageType` as the caller wrote it (`"Text"` stays `"Text"`).
    pub requested_type: String,
    pub channel: ChannelInfo,
    pub kind: MessageKind,
}

impl DispatchReceipt {
    pub fn message(&self) -> String {
        format!(
            "{} message sent successfully to {}",
            self.requested_type, self.requested_name
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{NOT_READY_MESSAGE}")]
    NotReady,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Channel \"{name}\" not found. Make sure you are subscribed to it.")]
    ChannelNotFound { name: String },

    #[error("failed to stage media: {0}")]
    Staging(#[source] courier_media::Error),

    #[error("failed to send message: {0}")]
    Dispatch(#[source] courier_channels::Error),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ChannelNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Staging(_) | Self::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Source chain for unexpected failures, `None` for caller mistakes.
    pub fn detail(&self) -> Option<String> {
        if self.status() != StatusCode::INTERNAL_SERVER_ERROR {
            return None;
        }
        let mut chain = Vec::new();
        let mut source = self.source();
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        Some(chain.join(": "))
    }
}

impl From<courier_media::Error> for DispatchError {
    fn from(err: courier_media::Error) -> Self {
        if err.is_invalid_input() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Staging(err)
        }
    }
}

/// A request that passed validation.
enum Validated {
    Text(String),
    Media {
        kind: MediaKind,
        source: MediaSource,
        mimetype: String,
        filename: Option<String>,
        options: SendOptions,
    },
}

/// Validated request plus the names the caller used, echoed in the receipt.
struct Admitted {
    channel_name: String,
    message_type: String,
    kind: MessageKind,
    body: Validated,
}

fn validate(req: SendRequest) -> Result<Admitted, DispatchError> {
    let invalid = |msg: String| Err(DispatchError::InvalidRequest(msg));

    if req.channel_name.is_empty() {
        return invalid("channelName is required".into());
    }
    if req.message_type.is_empty() {
        return invalid("messageType is required (text, image, audio, video)".into());
    }
    let kind: MessageKind = match req.message_type.parse() {
        Ok(kind) => kind,
        Err(_) => {
            return invalid(format!(
                "Unsupported message type: {}. Supported types: text, image, audio, video",
                req.message_type
            ));
        },
    };

    let body = match kind.media() {
        None => match req.text {
            Some(text) if !text.is_empty() => Validated::Text(text),
            _ => return invalid("messageData.text is required for text messages".into()),
        },
        Some(media_kind) => {
            let missing = || {
                invalid(format!(
                    "messageData must contain data (base64) and mimetype for {}",
                    plural_label(media_kind)
                ))
            };
            let (source, mimetype) = match (req.media, req.mimetype) {
                (Some(MediaSource::Base64(data)), _) if data.trim().is_empty() => {
                    return missing();
                },
                (Some(MediaSource::LocalFile(path)), mimetype) => {
                    let mimetype = mimetype
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| mime::mime_for_path(&path, media_kind));
                    (MediaSource::LocalFile(path), mimetype)
                },
                (Some(source), Some(mimetype)) if !mimetype.trim().is_empty() => (source, mimetype),
                _ => return missing(),
            };
            if mime_disagrees(media_kind, &mimetype) {
                warn!(
                    kind = %media_kind,
                    mimetype = %mimetype,
                    "mimetype does not match messageType, sending as declared"
                );
            }
            Validated::Media {
                kind: media_kind,
                source,
                mimetype,
                filename: req.filename,
                options: SendOptions::for_kind(media_kind, req.caption, req.as_voice_note),
            }
        },
    };

    Ok(Admitted {
        channel_name: req.channel_name,
        message_type: req.message_type,
        kind,
        body,
    })
}

/// Noun used in validation messages: "images", "audio", "video".
fn plural_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "images",
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }
}

/// `true` when the declared MIME type names a different media kind.
/// Unknown top-level types (`application/...`) never disagree.
fn mime_disagrees(kind: MediaKind, mimetype: &str) -> bool {
    MediaKind::from_mime(mimetype).is_some_and(|declared| declared != kind)
}

/// Orchestrates a single send.
#[derive(Clone)]
pub struct MessageDispatcher {
    gate: Arc<DispatchGate>,
    session: Arc<dyn ChannelSession>,
    staging: StagingStore,
    transcoder: Option<TranscodeEngine>,
}

impl MessageDispatcher {
    pub fn new(
        gate: Arc<DispatchGate>,
        session: Arc<dyn ChannelSession>,
        staging: StagingStore,
    ) -> Self {
        Self {
            gate,
            session,
            staging,
            transcoder: None,
        }
    }

    /// Normalize audio and video before sending. Degraded conversions fall
    /// back to the payload as received.
    pub fn with_ingest_transcoding(mut self, engine: TranscodeEngine) -> Self {
        self.transcoder = Some(engine);
        self
    }

    pub fn gate(&self) -> &DispatchGate {
        &self.gate
    }

    pub fn session(&self) -> &Arc<dyn ChannelSession> {
        &self.session
    }

    pub async fn send(&self, req: SendRequest) -> Result<DispatchReceipt, DispatchError> {
        if !self.gate.is_ready() {
            debug!(channel = %req.channel_name, "rejecting send, session not ready");
            return Err(DispatchError::NotReady);
        }

        let Admitted {
            channel_name: requested_name,
            message_type: requested_type,
            kind,
            body,
        } = validate(req)?;

        // A failed lookup is reported like a missing channel.
        let channels = match self.session.list_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(channel = %requested_name, error = %e, "failed to list channels");
                Vec::new()
            },
        };
        let channel = find_channel(&channels, &requested_name)
            .cloned()
            .ok_or_else(|| DispatchError::ChannelNotFound {
                name: requested_name.clone(),
            })?;

        info!(channel = %requested_name, kind = %kind, "sending message");

        match body {
            Validated::Text(text) => self
                .session
                .send_text(&channel, &text)
                .await
                .map_err(DispatchError::Dispatch)?,
            Validated::Media {
                kind,
                source,
                mimetype,
                filename,
                options,
            } => {
                self.send_media(
                    &channel,
                    kind,
                    source,
                    &mimetype,
                    filename.as_deref(),
                    &options,
                )
                .await?
            },
        }

        info!(channel = %requested_name, kind = %kind, "message sent");
        Ok(DispatchReceipt {
            requested_name,
            requested_type,
            channel,
            kind,
        })
    }

    async fn send_media(
        &self,
        channel: &ChannelInfo,
        kind: MediaKind,
        source: MediaSource,
        mimetype: &str,
        filename: Option<&str>,
        options: &SendOptions,
    ) -> Result<(), DispatchError> {
        let text = match source {
            MediaSource::Base64(text) => text,
            MediaSource::LocalFile(path) => {
                let name = filename
                    .or_else(|| path.file_name().and_then(|n| n.to_str()))
                    .unwrap_or("media");
                let handle = MediaHandle::File {
                    path: &path,
                    mimetype,
                    filename: name,
                };
                return self.deliver(channel, kind, handle, options).await;
            },
        };

        let staged = self
            .staging
            .stage(StagePayload::Base64(text), mimetype, filename)
            .await?;
        debug!(
            path = %staged.path().display(),
            size = staged.size(),
            "staged media for send"
        );
        let result = self.deliver(channel, kind, staged.handle(), options).await;
        staged.release().await;
        result
    }

    /// Send `original`, converting it first when ingest transcoding is
    /// enabled and the file needs it.
    async fn deliver(
        &self,
        channel: &ChannelInfo,
        kind: MediaKind,
        original: MediaHandle<'_>,
        options: &SendOptions,
    ) -> Result<(), DispatchError> {
        let converted = match (&self.transcoder, original) {
            (Some(engine), MediaHandle::File { path, .. }) => engine.convert_for(kind, path).await,
            _ => None,
        };

        let result = match &converted {
            Some(file) => {
                let name = file.display_name(original.filename().unwrap_or("media"));
                let handle = MediaHandle::File {
                    path: file.path(),
                    mimetype: file.mimetype(),
                    filename: &name,
                };
                self.session.send_media(channel, handle, options).await
            },
            None => self.session.send_media(channel, original, options).await,
        };

        if let Some(file) = converted {
            file.remove().await;
        }
        result.map_err(|e| {
            warn!(channel = %channel.name, error = %e, "media send failed");
            DispatchError::Dispatch(e)
        })
    }
}
