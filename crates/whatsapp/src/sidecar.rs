//! WebSocket client for the sidecar.
//!
//! Requests carry a `request_id`; the reader task routes the matching reply
//! to the waiting caller through a oneshot. Frames that answer nothing
//! (lifecycle events, stray errors) go to the [`MessageCallback`].

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    courier_channels::{Error, Result},
    futures::{SinkExt, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::types::{GatewayMessage, SidecarMessage};

pub const DEFAULT_SIDECAR_PORT: u16 = 3600;

/// Delay between connection attempts while the sidecar boots.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Receives every frame that is not a reply to a pending request.
pub type MessageCallback = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

type Waiters = HashMap<String, oneshot::Sender<SidecarMessage>>;
type PendingMap = Arc<Mutex<Waiters>>;

/// Cheap, cloneable handle to a live sidecar connection.
#[derive(Clone)]
pub struct SidecarHandle {
    write_tx: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.write_tx.is_closed()
    }

    /// Send a frame without waiting for a reply.
    pub fn send(&self, msg: &GatewayMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.write_tx
            .send(json)
            .map_err(|_| Error::unavailable("sidecar connection closed"))
    }

    /// Send `msg` and wait up to `timeout` for the frame answering it.
    pub async fn request(&self, msg: GatewayMessage, timeout: Duration) -> Result<SidecarMessage> {
        let Some(request_id) = msg.request_id().map(str::to_owned) else {
            return Err(Error::invalid_input("frame has no request_id"));
        };

        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(request_id.clone(), tx);

        if let Err(e) = self.send(&msg) {
            self.pending_map().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::unavailable("sidecar connection closed before reply")),
            Err(_) => {
                self.pending_map().remove(&request_id);
                Err(Error::Timeout {
                    operation: format!("sidecar reply to {request_id}"),
                    secs: timeout.as_secs(),
                })
            },
        }
    }

    fn pending_map(&self) -> MutexGuard<'_, Waiters> {
        lock(&self.pending)
    }
}

/// Fresh correlation id for a request frame.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Connect to the sidecar listening on `127.0.0.1:port`.
///
/// The returned receiver resolves when the connection ends.
pub async fn connect(
    port: u16,
    callback: MessageCallback,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let url = format!("ws://127.0.0.1:{port}");
    let (ws, _response) = connect_async(&url)
        .await
        .map_err(|e| Error::external(format!("connect to sidecar at {url}"), e))?;
    let (mut sink, mut stream) = ws.split();

    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
    let (closed_tx, closed_rx) = oneshot::channel();
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let connected = Arc::new(AtomicBool::new(true));

    let handle = SidecarHandle {
        write_tx,
        pending: Arc::clone(&pending),
        connected: Arc::clone(&connected),
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => route(&text, &pending, &callback),
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("sidecar closed the connection");
                        break;
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        warn!(error = %e, "sidecar websocket error");
                        break;
                    },
                },
                outgoing = write_rx.recv() => match outgoing {
                    Some(json) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            warn!(error = %e, "failed to write to sidecar");
                            break;
                        }
                    },
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    },
                },
            }
        }

        connected.store(false, Ordering::Release);
        // Dropping the senders fails every in-flight request immediately.
        lock(&pending).clear();
        let _ = closed_tx.send(());
    });

    info!(port, "connected to WhatsApp sidecar");
    Ok((handle, closed_rx))
}

/// [`connect`], retrying while the sidecar process is still starting.
pub async fn connect_with_retry(
    port: u16,
    callback: MessageCallback,
    attempts: u32,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match connect(port, Arc::clone(&callback)).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                debug!(attempt, error = %e, "sidecar not reachable yet");
                last_err = Some(e);
                tokio::time::sleep(RETRY_DELAY).await;
            },
        }
    }
    Err(last_err.unwrap_or_else(|| Error::unavailable("sidecar not reachable")))
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, Waiters> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn route(text: &str, pending: &PendingMap, callback: &MessageCallback) {
    let msg = match serde_json::from_str::<SidecarMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "ignoring unrecognised sidecar frame");
            return;
        },
    };

    let waiter = msg.request_id().and_then(|id| lock(pending).remove(id));
    match waiter {
        Some(tx) => {
            let _ = tx.send(msg);
        },
        None => callback(msg),
    }
}
