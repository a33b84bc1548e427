//! Commands that talk to a running gateway over HTTP.

use std::path::Path;

use {
    anyhow::{Context, Result, bail},
    courier_common::{MediaKind, MessageKind},
    courier_config::TranscodeConfig,
    courier_media::{PreparedUpload, TranscodeEngine, prepare_local_file},
    reqwest::StatusCode,
    serde_json::{Value, json},
    tokio::io::{AsyncBufReadExt, BufReader},
    tracing::debug,
};

pub const DEFAULT_API_URL: &str = "http://localhost:3000";

pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        let url = self.url(path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        read_json(resp).await
    }

    async fn post_message(&self, payload: &Value) -> Result<(StatusCode, Value)> {
        let url = self.url("/send-message");
        debug!(%url, "posting message");
        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        read_json(resp).await
    }
}

async fn read_json(resp: reqwest::Response) -> Result<(StatusCode, Value)> {
    let status = resp.status();
    let text = resp.text().await.context("failed to read response body")?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok((status, body))
}

pub fn text_payload(channel: &str, text: &str) -> Value {
    json!({
        "channelName": channel,
        "messageType": MessageKind::Text,
        "messageData": { "text": text },
    })
}

/// The `/send-message` body for a prepared local file.
///
/// Audio always goes out as a voice note; images and videos carry a caption,
/// empty when none was given.
pub fn media_payload(
    channel: &str,
    kind: MediaKind,
    upload: &PreparedUpload,
    caption: Option<&str>,
) -> Value {
    let mut data = json!({
        "data": upload.base64(),
        "mimetype": upload.mimetype,
        "filename": upload.filename,
        "filesize": upload.filesize,
    });
    match kind {
        MediaKind::Audio => data["asVoiceNote"] = json!(true),
        MediaKind::Image | MediaKind::Video => data["caption"] = json!(caption.unwrap_or_default()),
    }
    json!({
        "channelName": channel,
        "messageType": kind,
        "messageData": data,
    })
}

/// Print the gateway's reply; non-2xx becomes an error so the process exits 1.
fn report(status: StatusCode, body: &Value) -> Result<()> {
    let pretty = serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string());
    if status.is_success() {
        println!("Success!");
        println!("{pretty}");
        Ok(())
    } else {
        eprintln!("Error:");
        eprintln!("{pretty}");
        bail!("gateway returned HTTP {}", status.as_u16())
    }
}

/// Send `text`, or every non-empty stdin line when no text is given.
pub async fn send_text(api: &ApiClient, channel: &str, text: Option<String>) -> Result<()> {
    if let Some(text) = text {
        eprintln!("Sending text to \"{channel}\": \"{text}\"");
        let (status, body) = api.post_message(&text_payload(channel, &text)).await?;
        return report(status, &body);
    }

    eprintln!("Reading lines from stdin; each line is sent to \"{channel}\".");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut failed = 0usize;
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (status, body) = api.post_message(&text_payload(channel, line)).await?;
        if report(status, &body).is_err() {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} message(s) were rejected");
    }
    Ok(())
}

pub async fn send_media(
    api: &ApiClient,
    transcode: &TranscodeConfig,
    file: &Path,
    channel: &str,
    message_type: &str,
    caption: Option<&str>,
) -> Result<()> {
    let kind = media_kind(message_type)?;

    let engine = TranscodeEngine::detect(transcode).await;
    let upload = prepare_local_file(&engine, file, kind).await?;

    eprintln!("Reading file: {}", file.display());
    eprintln!("File size: {:.2} KB", upload.filesize as f64 / 1024.0);
    eprintln!("MIME type: {}", upload.mimetype);
    if upload.transcoded {
        eprintln!("Converted with {}", engine.provider_id());
    }
    eprintln!("Sending {kind} to channel: {channel}");

    let payload = media_payload(channel, kind, &upload, caption);
    let sent = api.post_message(&payload).await;
    upload.finish().await;

    let (status, body) = sent?;
    report(status, &body)
}

fn media_kind(message_type: &str) -> Result<MediaKind> {
    let kind: MessageKind = message_type.parse()?;
    match kind.media() {
        Some(media) => Ok(media),
        None => bail!("send-media needs image, audio or video; use send-text for text"),
    }
}

pub async fn channels(api: &ApiClient) -> Result<()> {
    let (status, body) = api.get("/channels").await?;
    if !status.is_success() {
        return report(status, &body);
    }

    let list = body["channels"].as_array().cloned().unwrap_or_default();
    if list.is_empty() {
        println!("No channels found.");
        return Ok(());
    }
    for ch in &list {
        println!(
            "  {}  ({})",
            ch["name"].as_str().unwrap_or_default(),
            ch["id"].as_str().unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn status(api: &ApiClient) -> Result<()> {
    let (status, body) = api.get("/status").await?;
    report(status, &body)
}
