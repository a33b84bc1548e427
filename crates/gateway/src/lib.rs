//! Gateway: the HTTP surface and the message dispatch pipeline.
//!
//! Lifecycle:
//! 1. Load config, sweep leftover staged media
//! 2. Start the WhatsApp session in the background (the gate stays closed
//!    until it reports ready)
//! 3. Serve `/health`, `/status`, `/channels` and `/send-message`
//!
//! Sends go through [`dispatch::MessageDispatcher`]; the network itself is
//! behind the [`courier_channels::ChannelSession`] trait.

pub mod dispatch;
pub mod request;
pub mod server;

pub use {
    dispatch::{DispatchError, DispatchReceipt, MediaSource, MessageDispatcher, SendRequest},
    server::{build_gateway_app, start_gateway},
};
