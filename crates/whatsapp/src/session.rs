//! [`ChannelSession`] backed by the WhatsApp Web sidecar.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    courier_channels::{
        ChannelInfo, ChannelSession, DispatchGate, Error, LifecycleEvent, MediaHandle, Result,
        SendOptions,
    },
    courier_config::WhatsAppConfig,
    tokio::sync::{Mutex, RwLock},
    tracing::{info, warn},
};

use crate::{
    process::{SidecarConfig, SidecarProcess, start_sidecar},
    sidecar::{MessageCallback, SidecarHandle, connect_with_retry, new_request_id},
    types::{GatewayMessage, MediaOptions, MediaPayload, SidecarMessage},
};

const CONNECT_ATTEMPTS: u32 = 20;

/// The WhatsApp Web session. Lifecycle frames from the sidecar are the only
/// writers of the shared [`DispatchGate`].
pub struct WhatsAppSession {
    gate: Arc<DispatchGate>,
    config: WhatsAppConfig,
    sidecar: RwLock<Option<SidecarHandle>>,
    process: Mutex<Option<SidecarProcess>>,
}

impl WhatsAppSession {
    pub fn new(config: WhatsAppConfig, gate: Arc<DispatchGate>) -> Self {
        Self {
            gate,
            config,
            sidecar: RwLock::new(None),
            process: Mutex::new(None),
        }
    }

    pub fn gate(&self) -> &Arc<DispatchGate> {
        &self.gate
    }

    /// Start the sidecar (when `auto_start`), connect, and request login.
    ///
    /// Returns once the login has been requested; the gate opens later, when
    /// the sidecar reports `ready`.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.config.auto_start {
            let mut process = self.process.lock().await;
            let running = process.as_mut().is_some_and(SidecarProcess::is_running);
            if !running {
                let launch = SidecarConfig::from_config(&self.config)?;
                *process = Some(start_sidecar(&launch).await?);
            }
        }

        let (handle, closed) = connect_with_retry(
            self.config.sidecar_port,
            lifecycle_listener(Arc::clone(&self.gate)),
            CONNECT_ATTEMPTS,
        )
        .await?;

        handle.send(&GatewayMessage::Login {
            account_id: self.config.account_id.clone(),
            auth_dir: self
                .config
                .auth_dir
                .as_ref()
                .map(|p| p.display().to_string()),
        })?;
        *self.sidecar.write().await = Some(handle);

        let gate = Arc::clone(&self.gate);
        tokio::spawn(async move {
            if closed.await.is_ok() {
                warn!("lost connection to WhatsApp sidecar");
                gate.apply(LifecycleEvent::Disconnected);
            }
        });

        info!(account_id = %self.config.account_id, "WhatsApp login requested");
        Ok(())
    }

    /// Log out, disconnect, and stop the sidecar if we started it.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sidecar.write().await.take() {
            let _ = handle.send(&GatewayMessage::Logout {
                account_id: self.config.account_id.clone(),
            });
        }
        if let Some(mut process) = self.process.lock().await.take() {
            process.stop().await;
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    async fn handle(&self) -> Result<SidecarHandle> {
        match self.sidecar.read().await.as_ref() {
            Some(handle) if handle.is_connected() => Ok(handle.clone()),
            _ => Err(Error::unavailable("not connected to the WhatsApp sidecar")),
        }
    }

    async fn expect_sent(&self, msg: GatewayMessage) -> Result<()> {
        let reply = self.handle().await?.request(msg, self.timeout()).await?;
        match reply {
            SidecarMessage::SendResult { success: true, .. } => Ok(()),
            SidecarMessage::SendResult { error, .. } => Err(Error::rejected(
                error.unwrap_or_else(|| "unknown error".into()),
            )),
            SidecarMessage::Error { message, .. } => Err(Error::rejected(message)),
            other => Err(Error::invalid_input(format!(
                "unexpected sidecar reply: {other:?}"
            ))),
        }
    }
}

/// One listener for every lifecycle frame; each maps to one gate transition.
fn lifecycle_listener(gate: Arc<DispatchGate>) -> MessageCallback {
    Arc::new(move |msg| {
        match &msg {
            SidecarMessage::Qr { qr } => {
                info!(qr = %qr, "scan this QR code with WhatsApp to log in");
            },
            SidecarMessage::AuthFailure { message } => {
                warn!(reason = %message, "WhatsApp authentication failed");
            },
            SidecarMessage::Disconnected { reason } => {
                warn!(reason = %reason, "WhatsApp session disconnected");
            },
            SidecarMessage::Error { message, .. } => {
                warn!(error = %message, "sidecar reported an error");
            },
            _ => {},
        }
        if let Some(event) = msg.lifecycle_event() {
            gate.apply(event);
        }
    })
}

fn media_payload(media: MediaHandle<'_>) -> MediaPayload {
    match media {
        MediaHandle::File {
            path,
            mimetype,
            filename,
        } => MediaPayload {
            mimetype: mimetype.to_string(),
            filename: Some(filename.to_string()),
            path: Some(path.display().to_string()),
            data: None,
        },
        MediaHandle::Buffer {
            data,
            mimetype,
            filename,
        } => MediaPayload {
            mimetype: mimetype.to_string(),
            filename: filename.map(str::to_owned),
            path: None,
            data: Some(STANDARD.encode(data)),
        },
    }
}

fn media_options(options: &SendOptions) -> MediaOptions {
    match options {
        SendOptions::Image { caption } | SendOptions::Video { caption } => MediaOptions {
            caption: Some(caption.clone()),
            send_audio_as_voice: None,
        },
        SendOptions::Audio { as_voice_note } => MediaOptions {
            caption: None,
            send_audio_as_voice: Some(*as_voice_note),
        },
    }
}

#[async_trait]
impl ChannelSession for WhatsAppSession {
    fn id(&self) -> &str {
        "whatsapp-web"
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        let reply = self
            .handle()
            .await?
            .request(
                GatewayMessage::ListChannels {
                    request_id: new_request_id(),
                },
                self.timeout(),
            )
            .await?;
        match reply {
            SidecarMessage::ChannelList { channels, .. } => {
                Ok(channels.into_iter().map(ChannelInfo::from).collect())
            },
            SidecarMessage::Error { message, .. } => Err(Error::rejected(message)),
            other => Err(Error::invalid_input(format!(
                "unexpected sidecar reply: {other:?}"
            ))),
        }
    }

    async fn send_text(&self, channel: &ChannelInfo, text: &str) -> Result<()> {
        self.expect_sent(GatewayMessage::SendText {
            request_id: new_request_id(),
            channel_id: channel.id.clone(),
            text: text.to_string(),
        })
        .await
    }

    async fn send_media(
        &self,
        channel: &ChannelInfo,
        media: MediaHandle<'_>,
        options: &SendOptions,
    ) -> Result<()> {
        self.expect_sent(GatewayMessage::SendMedia {
            request_id: new_request_id(),
            channel_id: channel.id.clone(),
            media: media_payload(media),
            options: media_options(options),
        })
        .await
    }
}
