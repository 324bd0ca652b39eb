//! Two-phase command routines.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::channel::{Channel, PromptSpec};
use crate::error::{Error, Result, ShellError};

/// How long a routine spends consuming the shell prompt after an abort.
const ABORT_RESYNC_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-shell strategy driving one command.
///
/// [`start`](CommandRoutine::start) runs when the session is created and
/// [`finish`](CommandRoutine::finish) when the caller terminates it.
/// Whatever a routine pushes onto the channel's pattern stacks in `start`
/// it must pop again by the end of `finish`.
#[async_trait]
pub trait CommandRoutine: Send {
    /// Send the command and return the command line once the remote accepted it.
    async fn start(&mut self, channel: &mut Channel) -> Result<String>;

    /// Wait for completion and return `(exit_code, output)`.
    async fn finish(&mut self, channel: &mut Channel) -> Result<(i32, String)>;

    /// Cleanup hook for an error raised while the command was running.
    ///
    /// Called instead of `finish`. Failures here are logged, the original
    /// error is what the caller sees.
    async fn abort(&mut self, _channel: &mut Channel, _error: &Error) {}
}

/// Command routine for POSIX shells.
///
/// While the command runs, the shell prompt is installed as an abort
/// pattern so that reads for a program's own prompt fail fast when the
/// program exits. Completion reads up to the shell prompt and then asks
/// the shell for `$?`.
#[derive(Debug)]
pub struct PosixCommandRoutine {
    command: String,
    prompt: PromptSpec,
    abort_installed: bool,
}

impl PosixCommandRoutine {
    pub fn new(command: impl Into<String>, prompt: PromptSpec) -> Self {
        Self {
            command: command.into(),
            prompt,
            abort_installed: false,
        }
    }

    fn remove_abort(&mut self, channel: &mut Channel) {
        if std::mem::take(&mut self.abort_installed) {
            channel.pop_abort();
        }
    }
}

#[async_trait]
impl CommandRoutine for PosixCommandRoutine {
    async fn start(&mut self, channel: &mut Channel) -> Result<String> {
        channel.send_line_read_back(&self.command).await?;
        channel.push_abort(self.prompt.clone());
        self.abort_installed = true;
        Ok(self.command.clone())
    }

    async fn finish(&mut self, channel: &mut Channel) -> Result<(i32, String)> {
        self.remove_abort(channel);
        let timeout = channel.timeout();

        let output = channel.read_until(&self.prompt, timeout).await?;

        channel.send_line_read_back("echo $?").await?;
        let raw = channel.read_until(&self.prompt, timeout).await?;
        let exit_code = raw
            .trim()
            .parse::<i32>()
            .map_err(|_| ShellError::InvalidExitCode {
                command: self.command.clone(),
                raw: raw.clone(),
            })?;

        Ok((exit_code, output))
    }

    async fn abort(&mut self, channel: &mut Channel, error: &Error) {
        self.remove_abort(channel);
        // The prompt that tripped the abort is still buffered.
        if error.is_unexpected_abort() {
            if let Err(e) = channel.read_until(&self.prompt, ABORT_RESYNC_TIMEOUT).await {
                debug!("session: no prompt after abort of {:?}: {}", self.command, e);
            }
        }
    }
}
