//! In-memory transport pair.
//!
//! [`LoopbackTransport::pair`] returns the channel-facing end and a
//! [`LoopbackPeer`] that plays the remote: whatever the peer feeds shows up
//! in `receive`, whatever the channel sends can be read back from the peer.
//! Used to script fake remotes in tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Received, Transport};
use crate::error::{Result, TransportError};

/// Channel-facing end of an in-memory transport.
#[derive(Debug)]
pub struct LoopbackTransport {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    open: bool,
}

/// Remote-facing end of an in-memory transport.
#[derive(Debug)]
pub struct LoopbackPeer {
    to_channel: Option<mpsc::UnboundedSender<Vec<u8>>>,
    from_channel: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl LoopbackTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (LoopbackTransport, LoopbackPeer) {
        let (to_channel, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_channel) = mpsc::unbounded_channel();
        (
            LoopbackTransport {
                incoming,
                outgoing,
                open: true,
            },
            LoopbackPeer {
                to_channel: Some(to_channel),
                from_channel,
            },
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(TransportError::Disconnected.into());
        }
        self.outgoing
            .send(data.to_vec())
            .map_err(|_| TransportError::Disconnected)?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Received> {
        if !self.open {
            return Ok(Received::Eof);
        }
        match tokio::time::timeout(timeout, self.incoming.recv()).await {
            Ok(Some(data)) => Ok(Received::Data(data)),
            Ok(None) => {
                self.open = false;
                Ok(Received::Eof)
            }
            Err(_) => Ok(Received::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.incoming.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl LoopbackPeer {
    /// Make `data` available to the channel.
    pub fn feed(&self, data: impl AsRef<[u8]>) {
        if let Some(tx) = &self.to_channel {
            // A closed channel simply drops what the peer writes.
            let _ = tx.send(data.as_ref().to_vec());
        }
    }

    /// Wait for the next chunk the channel sent. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_channel.recv().await
    }

    /// Everything the channel sent so far, concatenated.
    pub fn drain_sent(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.from_channel.try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Signal EOF to the channel.
    pub fn hang_up(&mut self) {
        self.to_channel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_moves_bytes_both_ways() {
        let (mut transport, mut peer) = LoopbackTransport::pair();

        transport.send(b"ls\n").await.unwrap();
        assert_eq!(peer.recv().await, Some(b"ls\n".to_vec()));

        peer.feed("file.txt\n");
        assert_eq!(
            transport.receive(Duration::from_secs(1)).await.unwrap(),
            Received::Data(b"file.txt\n".to_vec())
        );
    }

    #[tokio::test]
    async fn test_receive_times_out_then_reports_eof() {
        let (mut transport, mut peer) = LoopbackTransport::pair();
        assert_eq!(
            transport.receive(Duration::from_millis(10)).await.unwrap(),
            Received::Timeout
        );

        peer.hang_up();
        assert_eq!(
            transport.receive(Duration::from_millis(10)).await.unwrap(),
            Received::Eof
        );
        assert!(!transport.is_open());
    }
}
