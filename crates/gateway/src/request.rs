//! Wire shapes for the HTTP surface.

use {
    chrono::{SecondsFormat, Utc},
    serde::{Deserialize, Serialize},
};

use crate::dispatch::{MediaSource, SendRequest};

/// `POST /send-message` body. Every field is optional on the wire so that
/// a missing one is reported by validation instead of by the JSON parser.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub message_data: Option<MessageData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 payload for media kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_voice_note: Option<bool>,
    /// Informational; the decoded size is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

impl From<SendMessageBody> for SendRequest {
    fn from(body: SendMessageBody) -> Self {
        let data = body.message_data.unwrap_or_default();
        Self {
            channel_name: body.channel_name.unwrap_or_default(),
            message_type: body.message_type.unwrap_or_default(),
            text: data.text,
            media: data.data.map(MediaSource::Base64),
            mimetype: data.mimetype,
            filename: data.filename,
            caption: data.caption,
            as_voice_note: data.as_voice_note,
        }
    }
}

/// `{ success: true, message, timestamp }`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
}

/// `{ success: false, error, detail? }`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
