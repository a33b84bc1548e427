use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{DefaultBodyLimit, State, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    courier_channels::DispatchGate,
    courier_config::CourierConfig,
    courier_media::{StagingStore, TranscodeEngine},
    courier_whatsapp::WhatsAppSession,
    tower_http::trace::TraceLayer,
    tracing::{error, info, warn},
};

use crate::{
    dispatch::{DispatchError, MessageDispatcher, SendRequest},
    request::{ErrorResponse, SendMessageBody, SendMessageResponse, timestamp},
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<MessageDispatcher>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the HTTP router (shared between production startup and tests).
pub fn build_gateway_app(dispatcher: MessageDispatcher, body_limit: usize) -> Router {
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/channels", get(channels_handler))
        .route("/send-message", post(send_message_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the WhatsApp session and serve HTTP until Ctrl-C.
pub async fn start_gateway(config: CourierConfig) -> anyhow::Result<()> {
    let gate = Arc::new(DispatchGate::new());
    let session = Arc::new(WhatsAppSession::new(
        config.whatsapp.clone(),
        Arc::clone(&gate),
    ));

    let staging = StagingStore::new(config.media.resolved_staging_dir());
    match staging.sweep().await {
        Ok(0) => {},
        Ok(n) => info!(removed = n, dir = %staging.dir().display(), "swept leftover staged media"),
        Err(e) => warn!(error = %e, "failed to sweep staging dir"),
    }

    let mut dispatcher = MessageDispatcher::new(Arc::clone(&gate), session.clone(), staging);
    if config.media.transcode_on_ingest {
        let engine = TranscodeEngine::detect(&config.transcode).await;
        info!(provider = engine.provider_id(), "ingest transcoding enabled");
        dispatcher = dispatcher.with_ingest_transcoding(engine);
    }

    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if let Err(e) = session.start().await {
                error!(error = %e, "failed to start WhatsApp session");
            }
        });
    }

    let app = build_gateway_app(dispatcher, config.server.body_limit_bytes());
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "courier gateway listening");
    info!("health check: http://{addr}/health");
    info!("send message: POST http://{addr}/send-message");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    session.shutdown().await;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "whatsappReady": state.dispatcher.gate().is_ready(),
        "timestamp": timestamp(),
    }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gate = state.dispatcher.gate();
    Json(serde_json::json!({
        "ready": gate.is_ready(),
        "state": gate.state(),
        "timestamp": timestamp(),
    }))
}

async fn channels_handler(State(state): State<AppState>) -> Response {
    if !state.dispatcher.gate().is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("WhatsApp client is not ready")),
        )
            .into_response();
    }

    match state.dispatcher.session().list_channels().await {
        Ok(channels) => Json(serde_json::json!({
            "success": true,
            "count": channels.len(),
            "channels": channels,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "failed to list channels");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            )
                .into_response()
        },
    }
}

async fn send_message_handler(
    State(state): State<AppState>,
    body: Result<Json<SendMessageBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(rejection),
    };

    match state.dispatcher.send(SendRequest::from(body)).await {
        Ok(receipt) => Json(SendMessageResponse {
            success: true,
            message: receipt.message(),
            timestamp: timestamp(),
        })
        .into_response(),
        Err(err) => dispatch_error(err),
    }
}

fn dispatch_error(err: DispatchError) -> Response {
    let status = err.status();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "send failed");
    } else {
        info!(status = status.as_u16(), error = %err, "send rejected");
    }
    let body = ErrorResponse::new(err.to_string()).with_detail(err.detail());
    (status, Json(body)).into_response()
}

/// Malformed JSON → 400, oversized body → 413, both in the usual error shape.
fn json_rejection(rejection: JsonRejection) -> Response {
    let status = match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(ErrorResponse::new(rejection.body_text()))).into_response()
}
