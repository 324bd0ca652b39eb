//! Stream backends.
//!
//! A [`Transport`] is the raw byte surface a [`Channel`](crate::channel::Channel)
//! is built on: send bytes, receive whatever arrives within a deadline,
//! close, and report liveness. Nothing above this layer knows whether the
//! bytes travel over a local pseudo-terminal, an SSH session or a serial
//! console client.

pub mod config;
mod loopback;
mod pty;
mod ssh;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use config::{AuthMethod, HostKeyVerification, PtyConfig, SshConfig};
pub use loopback::{LoopbackPeer, LoopbackTransport};
pub use pty::PtyTransport;
pub use ssh::SshTransport;

/// Outcome of a single [`Transport::receive`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Bytes that arrived before the deadline.
    Data(Vec<u8>),

    /// Nothing arrived before the deadline.
    Timeout,

    /// The remote end closed the stream. Every later receive reports this too.
    Eof,
}

/// Raw byte transport underneath a channel.
#[async_trait]
pub trait Transport: Send {
    /// Write all of `data` to the remote.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for the next chunk of bytes.
    async fn receive(&mut self, timeout: Duration) -> Result<Received>;

    /// Shut the transport down.
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport is still usable.
    fn is_open(&self) -> bool;
}
