//! Session abstraction for the messaging network.
//!
//! A [`ChannelSession`] is the authenticated connection that can list the
//! channels it sees and send text or media to them. Its lifecycle is mirrored
//! into a [`SessionState`] held by the [`DispatchGate`], which is the only
//! admission check a send has to pass before any work is done.

pub mod error;
pub mod gate;
pub mod session;

pub use {
    error::{Error, Result},
    gate::{DispatchGate, LifecycleEvent, SessionState},
    session::{ChannelInfo, ChannelSession, MediaHandle, SendOptions, find_channel},
};
