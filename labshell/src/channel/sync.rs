//! Waiting for a freshly attached shell to accept input.
//!
//! Right after a login or a spawn the remote may still be printing a
//! banner, running rc files or ignoring input altogether. The probe is an
//! `echo` whose argument is quoted so that the command line itself never
//! contains the marker; only a shell that actually executed it prints the
//! marker verbatim.

use std::time::Duration;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{Channel, PromptSpec};
use crate::error::{ChannelError, Result};

/// Text printed by a shell that executed the sync probe.
pub const SYNC_MARKER: &str = "LABSHELL-READY";

/// Tuning for [`wait_for_shell_with`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long to wait for the marker before probing again.
    pub probe_interval: Duration,

    /// Bytes allowed after the marker, enough for a newline and a prompt.
    pub trailing_noise: usize,

    /// Give up after this long. Defaults to the channel timeout.
    pub deadline: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(200),
            trailing_noise: 80,
            deadline: None,
        }
    }
}

fn probe() -> String {
    let (head, tail) = SYNC_MARKER.split_at(8);
    format!("echo {head}''{tail}")
}

/// Block until the remote shell executes commands.
pub async fn wait_for_shell(channel: &mut Channel) -> Result<()> {
    wait_for_shell_with(channel, &SyncConfig::default()).await
}

/// [`wait_for_shell`] with explicit tuning.
///
/// Only a read timeout triggers another probe; any other error, such as
/// the backend hanging up, ends the wait immediately.
pub async fn wait_for_shell_with(channel: &mut Channel, config: &SyncConfig) -> Result<()> {
    let overall = config.deadline.unwrap_or_else(|| channel.timeout());
    let started = Instant::now();
    let probe = probe();
    let marker = PromptSpec::literal(SYNC_MARKER).with_trailing_noise(config.trailing_noise);

    let mut channel = channel.with_prompt(marker);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        channel.send_line(&probe).await?;
        match channel.read_until_prompt_timeout(config.probe_interval).await {
            Ok(_) => {
                debug!("sync: shell ready after {} probe(s)", attempts);
                return Ok(());
            }
            Err(e) if e.is_timeout() => {
                if started.elapsed() >= overall {
                    debug!("sync: no response after {} probe(s)", attempts);
                    return Err(ChannelError::Timeout(overall).into());
                }
                trace!("sync: probe {} unanswered", attempts);
            }
            Err(e) => return Err(e),
        }
    }
}
