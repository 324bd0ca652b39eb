//! Local programs on a pseudo-terminal.

use std::io::{Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;

use super::config::PtyConfig;
use super::{Received, Transport};
use crate::error::{Result, TransportError};

const READ_CHUNK: usize = 4096;

/// A local program (usually a shell) running on its own pseudo-terminal.
///
/// A reader thread forwards everything the program writes into a tokio
/// channel. When the program exits the slave side closes, the reader
/// thread stops and [`receive`](Transport::receive) reports [`Received::Eof`].
///
/// The transport owns exactly one child process; closing or dropping it
/// kills that child. Processes the child started itself are not tracked.
pub struct PtyTransport {
    program: String,
    // Kept alive so the pty stays allocated.
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Option<Box<dyn Write + Send>>,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    open: bool,
}

impl PtyTransport {
    /// Spawn the configured program on a fresh pseudo-terminal.
    pub fn spawn(config: &PtyConfig) -> Result<Self> {
        let spawn_err = |message: String| TransportError::Spawn {
            program: config.program.clone(),
            message,
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: config.terminal_height,
                cols: config.terminal_width,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_err(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.program);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_err(e.to_string()))?;
        // Only the child may hold the slave, otherwise EOF never arrives.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_err(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_err(e.to_string()))?;

        let (tx, output) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", config.program))
            .spawn(move || pump_output(reader, tx))
            .map_err(TransportError::Io)?;

        debug!(
            "pty: spawned {} {:?} (pid {:?})",
            config.program,
            config.args,
            child.process_id()
        );

        Ok(Self {
            program: config.program.clone(),
            _master: pair.master,
            child,
            writer: Some(writer),
            output,
            open: true,
        })
    }

    /// OS process id of the child, if still known.
    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn shutdown(&mut self) {
        if !self.open && self.writer.is_none() {
            return;
        }
        self.open = false;
        self.writer = None;
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!("pty: failed to kill {}: {}", self.program, e);
            }
            let _ = self.child.wait();
        }
    }
}

fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            // EIO is how Linux reports a hung-up slave.
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for PtyTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(TransportError::Disconnected)?;
        writer.write_all(data).map_err(TransportError::Io)?;
        writer.flush().map_err(TransportError::Io)?;
        trace!("pty: sent {} bytes", data.len());
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Received> {
        if !self.open {
            return Ok(Received::Eof);
        }
        match tokio::time::timeout(timeout, self.output.recv()).await {
            Ok(Some(data)) => Ok(Received::Data(data)),
            Ok(None) => {
                debug!("pty: {} hung up", self.program);
                self.open = false;
                self.writer = None;
                Ok(Received::Eof)
            }
            Err(_) => Ok(Received::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(transport: &mut PtyTransport) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            match transport.receive(Duration::from_secs(5)).await.unwrap() {
                Received::Data(data) => out.extend_from_slice(&data),
                Received::Eof | Received::Timeout => return out,
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_reports_output_then_eof() {
        let config = PtyConfig::new("sh").args(["-c", "echo pty-hello"]);
        let mut transport = PtyTransport::spawn(&config).unwrap();

        let out = read_all(&mut transport).await;
        assert!(String::from_utf8_lossy(&out).contains("pty-hello"));
        assert!(!transport.is_open());
        assert_eq!(
            transport.receive(Duration::from_millis(10)).await.unwrap(),
            Received::Eof
        );
    }

    #[tokio::test]
    async fn test_close_kills_child() {
        let mut transport = PtyTransport::spawn(&PtyConfig::new("cat")).unwrap();
        assert!(transport.is_open());
        transport.close().await.unwrap();
        assert!(!transport.is_open());
        assert!(transport.send(b"x").await.is_err());
    }

    #[test]
    fn test_spawn_missing_program() {
        let err = PtyTransport::spawn(&PtyConfig::new("/nonexistent/labshell-test")).err();
        assert!(err.is_some());
    }
}
