//! WhatsApp Web session for courier.
//!
//! The WhatsApp Web client runs in a Node sidecar; this crate starts it,
//! talks to it over a local WebSocket, and exposes it as a
//! [`courier_channels::ChannelSession`]. Lifecycle frames from the sidecar
//! (`qr`, `ready`, `auth_failure`, `disconnected`) drive the shared
//! [`courier_channels::DispatchGate`].

pub mod process;
pub mod session;
pub mod sidecar;
pub mod types;

pub use {
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    session::WhatsAppSession,
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarHandle, connect_with_retry},
};
