#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests for the HTTP surface against an in-memory session.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    serde_json::{Value, json},
    tokio::net::TcpListener,
};

use {
    courier_channels::{
        ChannelInfo, ChannelSession, DispatchGate, Error, LifecycleEvent, MediaHandle, Result,
        SendOptions,
    },
    courier_gateway::{MediaSource, MessageDispatcher, SendRequest, build_gateway_app},
    courier_media::{StagingStore, TranscodeEngine, TranscodeJob, TranscodeProvider},
};

/// What the fake session saw for one media send.
#[derive(Debug, Clone)]
struct SentMedia {
    path_existed: bool,
    bytes: Vec<u8>,
    mimetype: String,
    filename: Option<String>,
    options: SendOptions,
}

#[derive(Default)]
struct FakeSession {
    fail_sends: bool,
    fail_lookup: bool,
    list_calls: Mutex<usize>,
    texts: Mutex<Vec<(String, String)>>,
    media: Mutex<Vec<SentMedia>>,
}

#[async_trait]
impl ChannelSession for FakeSession {
    fn id(&self) -> &str {
        "fake"
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        *self.list_calls.lock().unwrap() += 1;
        if self.fail_lookup {
            return Err(Error::unavailable("getChannels blew up"));
        }
        Ok(vec![ChannelInfo {
            id: "1@newsletter".into(),
            name: "Test Channel".into(),
        }])
    }

    async fn send_text(&self, channel: &ChannelInfo, text: &str) -> Result<()> {
        if self.fail_sends {
            return Err(Error::rejected("network said no"));
        }
        self.texts
            .lock()
            .unwrap()
            .push((channel.id.clone(), text.to_string()));
        Ok(())
    }

    async fn send_media(
        &self,
        _channel: &ChannelInfo,
        media: MediaHandle<'_>,
        options: &SendOptions,
    ) -> Result<()> {
        let (path_existed, bytes) = match media {
            MediaHandle::File { path, .. } => (path.exists(), std::fs::read(path).unwrap_or_default()),
            MediaHandle::Buffer { data, .. } => (false, data.to_vec()),
        };
        self.media.lock().unwrap().push(SentMedia {
            path_existed,
            bytes,
            mimetype: media.mimetype().to_string(),
            filename: media.filename().map(str::to_owned),
            options: options.clone(),
        });
        if self.fail_sends {
            return Err(Error::rejected("media refused"));
        }
        Ok(())
    }
}

/// Upper-cases the source into the output, standing in for ffmpeg.
struct Uppercase;

#[async_trait]
impl TranscodeProvider for Uppercase {
    fn id(&self) -> &'static str {
        "uppercase"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn transcode(&self, job: &TranscodeJob) -> courier_media::Result<()> {
        let data = std::fs::read(&job.source).unwrap();
        std::fs::write(&job.output, data.to_ascii_uppercase()).unwrap();
        Ok(())
    }
}

/// Writes half a file, then fails.
struct Crashing;

#[async_trait]
impl TranscodeProvider for Crashing {
    fn id(&self) -> &'static str {
        "crashing"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn transcode(&self, job: &TranscodeJob) -> courier_media::Result<()> {
        std::fs::write(&job.output, b"partial").unwrap();
        Err(courier_media::Error::Message("encoder crashed".into()))
    }
}

struct Missing;

#[async_trait]
impl TranscodeProvider for Missing {
    fn id(&self) -> &'static str {
        "missing"
    }

    async fn available(&self) -> bool {
        false
    }

    async fn transcode(&self, _job: &TranscodeJob) -> courier_media::Result<()> {
        panic!("an unavailable provider is never asked to transcode");
    }
}

struct Harness {
    addr: SocketAddr,
    gate: Arc<DispatchGate>,
    session: Arc<FakeSession>,
    staging_dir: PathBuf,
    scratch_dir: PathBuf,
    _tmp: tempfile::TempDir,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn staged_files(&self) -> usize {
        count_files(&self.staging_dir)
    }

    fn scratch_files(&self) -> usize {
        count_files(&self.scratch_dir)
    }

    async fn post(&self, body: Value) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(self.url("/send-message"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

async fn start(session: FakeSession, ready: bool, body_limit: usize) -> Harness {
    start_with(session, ready, body_limit, None).await
}

async fn start_with(
    session: FakeSession,
    ready: bool,
    body_limit: usize,
    transcoder: Option<Arc<dyn TranscodeProvider>>,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let staging_dir = tmp.path().join("temp_media");
    let scratch_dir = tmp.path().join("transcode");
    let gate = Arc::new(DispatchGate::new());
    if ready {
        gate.apply(LifecycleEvent::Authenticated);
    }
    let session = Arc::new(session);
    let mut dispatcher = MessageDispatcher::new(
        Arc::clone(&gate),
        session.clone(),
        StagingStore::new(&staging_dir),
    );
    if let Some(provider) = transcoder {
        dispatcher = dispatcher
            .with_ingest_transcoding(TranscodeEngine::with_provider(provider, scratch_dir.clone()));
    }
    let app = build_gateway_app(dispatcher, body_limit);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        addr,
        gate,
        session,
        staging_dir,
        scratch_dir,
        _tmp: tmp,
    }
}

async fn ready_server() -> Harness {
    start(FakeSession::default(), true, 50 * 1024 * 1024).await
}

#[tokio::test]
async fn text_message_is_sent() {
    let h = ready_server().await;
    let (status, body) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "text",
            "messageData": { "text": "hi" },
        }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "text message sent successfully to Test Channel");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    assert_eq!(
        h.session.texts.lock().unwrap().as_slice(),
        &[("1@newsletter".to_string(), "hi".to_string())]
    );
}

#[tokio::test]
async fn channel_match_ignores_case() {
    let h = ready_server().await;
    let (status, body) = h
        .post(json!({
            "channelName": "test CHANNEL",
            "messageType": "Text",
            "messageData": { "text": "hi" },
        }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Text message sent successfully to test CHANNEL");
}

#[tokio::test]
async fn closed_gate_returns_503_without_touching_session() {
    let h = start(FakeSession::default(), false, 1024 * 1024).await;
    let (status, body) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "image",
            "messageData": { "data": STANDARD.encode(b"png"), "mimetype": "image/png" },
        }))
        .await;

    assert_eq!(status, 503);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("not ready"));
    assert_eq!(*h.session.list_calls.lock().unwrap(), 0);
    assert!(!h.staging_dir.exists());
}

#[tokio::test]
async fn unknown_channel_returns_404() {
    let h = ready_server().await;
    let (status, body) = h
        .post(json!({
            "channelName": "Ghost Channel",
            "messageType": "text",
            "messageData": { "text": "boo" },
        }))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("Ghost Channel"));
}

#[tokio::test]
async fn missing_media_fields_return_400_before_staging() {
    let h = ready_server().await;
    let (status, body) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "image",
            "messageData": {},
        }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(*h.session.list_calls.lock().unwrap(), 0);
    assert!(!h.staging_dir.exists());
}

#[tokio::test]
async fn unsupported_type_and_missing_fields_are_400() {
    let h = ready_server().await;
    for body in [
        json!({ "messageType": "text", "messageData": { "text": "x" } }),
        json!({ "channelName": "Test Channel", "messageData": { "text": "x" } }),
        json!({ "channelName": "Test Channel", "messageType": "sticker" }),
        json!({ "channelName": "Test Channel", "messageType": "text" }),
    ] {
        let (status, resp) = h.post(body).await;
        assert_eq!(status, 400, "{resp}");
        assert_eq!(resp["success"], false);
    }
}

#[tokio::test]
async fn invalid_base64_is_400_and_leaves_nothing() {
    let h = ready_server().await;
    let (status, _) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "audio",
            "messageData": { "data": "!!!not base64!!!", "mimetype": "audio/mpeg" },
        }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(h.staged_files(), 0);
}

#[tokio::test]
async fn audio_is_staged_sent_and_released() {
    let h = ready_server().await;
    let (status, body) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "audio",
            "messageData": {
                "data": STANDARD.encode(b"ID3 fake mp3"),
                "mimetype": "audio/mpeg",
                "filename": "note.mp3",
                "filesize": 12,
            },
        }))
        .await;

    assert_eq!(status, 200, "{body}");
    assert_eq!(body["message"], "audio message sent successfully to Test Channel");

    let sent = h.session.media.lock().unwrap()[0].clone();
    assert!(sent.path_existed);
    assert_eq!(sent.bytes, b"ID3 fake mp3");
    assert_eq!(sent.mimetype, "audio/mpeg");
    assert_eq!(sent.filename.as_deref(), Some("note.mp3"));
    assert_eq!(sent.options, SendOptions::Audio {
        as_voice_note: true
    });
    assert_eq!(h.staged_files(), 0);
}

#[tokio::test]
async fn failed_media_send_is_500_with_detail_and_still_released() {
    let h = start(
        FakeSession {
            fail_sends: true,
            ..FakeSession::default()
        },
        true,
        1024 * 1024,
    )
    .await;
    let (status, body) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "video",
            "messageData": {
                "data": STANDARD.encode(b"\x00\x00\x00\x18ftypmp42"),
                "mimetype": "video/mp4",
                "caption": "watch",
            },
        }))
        .await;

    assert_eq!(status, 500);
    assert_eq!(body["success"], false);
    assert!(body["detail"].as_str().unwrap().contains("media refused"));
    let sent = h.session.media.lock().unwrap()[0].clone();
    assert!(sent.path_existed);
    assert_eq!(sent.options, SendOptions::Video {
        caption: "watch".into()
    });
    assert_eq!(h.staged_files(), 0);
}

#[tokio::test]
async fn concurrent_media_sends_do_not_collide() {
    let h = Arc::new(ready_server().await);
    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.post(json!({
                "channelName": "Test Channel",
                "messageType": "image",
                "messageData": {
                    "data": STANDARD.encode([i; 16]),
                    "mimetype": "image/png",
                    "filename": "same.png",
                },
            }))
            .await
            .0
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 200);
    }

    let media = h.session.media.lock().unwrap();
    assert_eq!(media.len(), 8);
    assert!(media.iter().all(|m| m.path_existed && m.bytes.len() == 16));
    drop(media);
    assert_eq!(h.staged_files(), 0);
}

#[tokio::test]
async fn malformed_json_is_400_and_oversized_is_413() {
    let h = start(FakeSession::default(), true, 1024).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(h.url("/send-message"))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);

    let resp = client
        .post(h.url("/send-message"))
        .json(&json!({
            "channelName": "Test Channel",
            "messageType": "image",
            "messageData": { "data": "A".repeat(4096), "mimetype": "image/png" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 413);
}

#[tokio::test]
async fn health_status_and_channels_follow_gate() {
    let h = start(FakeSession::default(), false, 1024).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(h.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["whatsappReady"], false);

    let resp = client.get(h.url("/channels")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);

    h.gate.apply(LifecycleEvent::LoginChallenge);
    let status: Value = client
        .get(h.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["ready"], false);
    assert_eq!(status["state"], "awaiting_auth");

    h.gate.apply(LifecycleEvent::Authenticated);
    let channels: Value = client
        .get(h.url("/channels"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(channels["success"], true);
    assert_eq!(channels["count"], 1);
    assert_eq!(channels["channels"][0]["name"], "Test Channel");

    h.gate.apply(LifecycleEvent::Disconnected);
    let resp = client.get(h.url("/channels")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);
}

#[tokio::test]
async fn local_files_are_sent_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("pic.png");
    std::fs::write(&file, b"png-bytes").unwrap();

    let gate = Arc::new(DispatchGate::new());
    gate.apply(LifecycleEvent::Authenticated);
    let session = Arc::new(FakeSession::default());
    let dispatcher = MessageDispatcher::new(
        gate,
        session.clone(),
        StagingStore::new(tmp.path().join("staging")),
    );

    let receipt = dispatcher
        .send(SendRequest::media(
            "Test Channel",
            courier_common::MediaKind::Image,
            MediaSource::LocalFile(file.clone()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(receipt.channel.id, "1@newsletter");

    let sent = session.media.lock().unwrap()[0].clone();
    assert_eq!(sent.mimetype, "image/png");
    assert_eq!(sent.filename.as_deref(), Some("pic.png"));
    assert!(file.exists(), "caller-owned files are not deleted");
    assert!(!Path::new(&tmp.path().join("staging")).exists());
}

#[tokio::test]
async fn text_send_failure_is_500() {
    let h = start(
        FakeSession {
            fail_sends: true,
            ..FakeSession::default()
        },
        true,
        1024,
    )
    .await;
    let (status, body) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "text",
            "messageData": { "text": "hi" },
        }))
        .await;
    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("network said no"));
}

#[tokio::test]
async fn failed_channel_lookup_is_404() {
    let h = start(
        FakeSession {
            fail_lookup: true,
            ..FakeSession::default()
        },
        true,
        1024,
    )
    .await;
    let (status, body) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "text",
            "messageData": { "text": "hi" },
        }))
        .await;
    assert_eq!(status, 404, "{body}");
    assert_eq!(
        body["error"],
        "Channel \"Test Channel\" not found. Make sure you are subscribed to it."
    );
    assert!(h.session.texts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn blank_channel_name_is_looked_up_not_rejected() {
    let h = ready_server().await;
    let (status, _) = h
        .post(json!({
            "channelName": "   ",
            "messageType": "text",
            "messageData": { "text": "hi" },
        }))
        .await;
    assert_eq!(status, 404);
    assert_eq!(*h.session.list_calls.lock().unwrap(), 1);
}

fn voice_note() -> Value {
    json!({
        "channelName": "Test Channel",
        "messageType": "audio",
        "messageData": {
            "data": STANDARD.encode(b"id3 quiet"),
            "mimetype": "audio/mpeg",
            "filename": "note.mp3",
        },
    })
}

#[tokio::test]
async fn ingest_transcoding_sends_converted_file() {
    let h = start_with(FakeSession::default(), true, 1024 * 1024, Some(Arc::new(Uppercase))).await;
    let (status, body) = h.post(voice_note()).await;
    assert_eq!(status, 200, "{body}");

    let sent = h.session.media.lock().unwrap()[0].clone();
    assert!(sent.path_existed);
    assert_eq!(sent.bytes, b"ID3 QUIET");
    assert_eq!(sent.mimetype, "audio/ogg; codecs=opus");
    assert_eq!(sent.filename.as_deref(), Some("note.ogg"));
    assert_eq!(h.staged_files(), 0);
    assert_eq!(h.scratch_files(), 0);
}

#[tokio::test]
async fn converted_file_is_removed_when_send_fails() {
    let h = start_with(
        FakeSession {
            fail_sends: true,
            ..FakeSession::default()
        },
        true,
        1024 * 1024,
        Some(Arc::new(Uppercase)),
    )
    .await;
    let (status, _) = h.post(voice_note()).await;
    assert_eq!(status, 500);

    let sent = h.session.media.lock().unwrap()[0].clone();
    assert_eq!(sent.bytes, b"ID3 QUIET");
    assert_eq!(h.staged_files(), 0);
    assert_eq!(h.scratch_files(), 0);
}

#[tokio::test]
async fn failed_conversion_falls_back_to_staged_original() {
    let h = start_with(FakeSession::default(), true, 1024 * 1024, Some(Arc::new(Crashing))).await;
    let (status, body) = h.post(voice_note()).await;
    assert_eq!(status, 200, "{body}");

    let sent = h.session.media.lock().unwrap()[0].clone();
    assert_eq!(sent.bytes, b"id3 quiet");
    assert_eq!(sent.mimetype, "audio/mpeg");
    assert_eq!(sent.filename.as_deref(), Some("note.mp3"));
    assert_eq!(h.staged_files(), 0);
    assert_eq!(h.scratch_files(), 0);
}

#[tokio::test]
async fn unavailable_transcoder_sends_original() {
    let h = start_with(FakeSession::default(), true, 1024 * 1024, Some(Arc::new(Missing))).await;
    let (status, _) = h.post(voice_note()).await;
    assert_eq!(status, 200);

    let sent = h.session.media.lock().unwrap()[0].clone();
    assert_eq!(sent.bytes, b"id3 quiet");
    assert_eq!(sent.mimetype, "audio/mpeg");
    assert_eq!(h.staged_files(), 0);
    assert_eq!(h.scratch_files(), 0);
}

#[tokio::test]
async fn images_are_never_converted() {
    let h = start_with(FakeSession::default(), true, 1024 * 1024, Some(Arc::new(Uppercase))).await;
    let (status, _) = h
        .post(json!({
            "channelName": "Test Channel",
            "messageType": "image",
            "messageData": { "data": STANDARD.encode(b"png"), "mimetype": "image/png" },
        }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(h.session.media.lock().unwrap()[0].bytes, b"png");
    assert_eq!(h.scratch_files(), 0);
}
