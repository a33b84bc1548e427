//! JSON frames exchanged with the sidecar over its WebSocket.

use {
    courier_channels::{ChannelInfo, LifecycleEvent},
    serde::{Deserialize, Serialize},
};

/// Frames sent from the gateway to the sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Start (or resume) the WhatsApp Web login for an account.
    Login {
        account_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_dir: Option<String>,
    },
    Logout {
        account_id: String,
    },
    ListChannels {
        request_id: String,
    },
    SendText {
        request_id: String,
        channel_id: String,
        text: String,
    },
    SendMedia {
        request_id: String,
        channel_id: String,
        media: MediaPayload,
        options: MediaOptions,
    },
}

impl GatewayMessage {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::ListChannels { request_id }
            | Self::SendText { request_id, .. }
            | Self::SendMedia { request_id, .. } => Some(request_id),
            Self::Login { .. } | Self::Logout { .. } => None,
        }
    }
}

/// Media body: either a path the sidecar can read or inline base64.
#[derive(Debug, Clone, Serialize)]
pub struct MediaPayload {
    pub mimetype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_audio_as_voice: Option<bool>,
}

/// Frames received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    /// Login challenge; `qr` is the payload to render as a QR code.
    Qr {
        qr: String,
    },
    Ready {
        #[serde(default)]
        account_id: Option<String>,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    ChannelList {
        request_id: String,
        channels: Vec<SidecarChannel>,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        request_id: Option<String>,
        message: String,
    },
}

impl SidecarMessage {
    /// Correlation id when this frame answers a request.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::ChannelList { request_id, .. } | Self::SendResult { request_id, .. } => {
                Some(request_id)
            },
            Self::Error { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Session lifecycle transition carried by this frame, if any.
    pub fn lifecycle_event(&self) -> Option<LifecycleEvent> {
        match self {
            Self::Qr { .. } => Some(LifecycleEvent::LoginChallenge),
            Self::Ready { .. } => Some(LifecycleEvent::Authenticated),
            Self::AuthFailure { .. } => Some(LifecycleEvent::AuthFailure),
            Self::Disconnected { .. } => Some(LifecycleEvent::Disconnected),
            _ => None,
        }
    }
}

/// A channel (newsletter) as reported by the sidecar.
#[derive(Debug, Clone, Deserialize)]
pub struct SidecarChannel {
    pub id: String,
    pub name: String,
}

impl From<SidecarChannel> for ChannelInfo {
    fn from(ch: SidecarChannel) -> Self {
        Self {
            id: ch.id,
            name: ch.name,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_frames_are_tagged() {
        let msg = GatewayMessage::SendMedia {
            request_id: "r1".into(),
            channel_id: "1@newsletter".into(),
            media: MediaPayload {
                mimetype: "audio/ogg; codecs=opus".into(),
                filename: Some("note.ogg".into()),
                path: Some("/tmp/x.ogg".into()),
                data: None,
            },
            options: MediaOptions {
                caption: None,
                send_audio_as_voice: Some(true),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "send_media");
        assert_eq!(json["media"]["path"], "/tmp/x.ogg");
        assert!(json["media"].get("data").is_none());
        assert_eq!(json["options"]["send_audio_as_voice"], true);
        assert_eq!(msg.request_id(), Some("r1"));
    }

    #[test]
    fn lifecycle_frames_map_to_events() {
        let qr: SidecarMessage = serde_json::from_str(r#"{"type":"qr","qr":"2@abc"}"#).unwrap();
        assert_eq!(qr.lifecycle_event(), Some(LifecycleEvent::LoginChallenge));

        let ready: SidecarMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(ready.lifecycle_event(), Some(LifecycleEvent::Authenticated));

        let gone: SidecarMessage =
            serde_json::from_str(r#"{"type":"disconnected","reason":"NAVIGATION"}"#).unwrap();
        assert_eq!(gone.lifecycle_event(), Some(LifecycleEvent::Disconnected));
        assert!(gone.request_id().is_none());
    }

    #[test]
    fn responses_carry_request_id() {
        let list: SidecarMessage = serde_json::from_str(
            r#"{"type":"channel_list","request_id":"r9","channels":[{"id":"1@newsletter","name":"Test Channel"}]}"#,
        )
        .unwrap();
        assert_eq!(list.request_id(), Some("r9"));
        assert!(list.lifecycle_event().is_none());

        let err: SidecarMessage =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert!(err.request_id().is_none());
    }
}
