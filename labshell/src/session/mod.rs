//! Interactive command sessions.
//!
//! A [`CommandSession`] holds the exclusive [`BorrowGrant`] over a shell's
//! channel for as long as one command runs. It is created RUNNING (the
//! routine's start phase runs during construction) and ends TERMINATED
//! once [`terminate`](CommandSession::terminate) has been called.

mod routine;

use std::time::Duration;

use log::{debug, error};

use crate::channel::{BorrowGrant, Channel, PromptSpec};
use crate::error::{Error, Result, SessionError, ShellError};

pub use routine::{CommandRoutine, PosixCommandRoutine};

/// Lifecycle state of a [`CommandSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, start phase not finished yet.
    Created,

    /// The command is running on the remote.
    Running,

    /// Terminated; the channel has been handed back.
    Terminated,
}

/// One command running on a borrowed channel.
///
/// Exactly one of [`terminate`](Self::terminate),
/// [`terminate0`](Self::terminate0) or
/// [`forward_error`](Self::forward_error) must be called before the
/// session goes out of scope. A session dropped while still running logs
/// an error and marks the channel, so the shell's next operation fails
/// with a protocol violation.
pub struct CommandSession<'a> {
    grant: Option<BorrowGrant<'a>>,
    routine: Box<dyn CommandRoutine>,
    command: String,
    state: SessionState,
    prompt_depth: usize,
    abort_depth: usize,
}

impl<'a> CommandSession<'a> {
    /// Run the routine's start phase on `grant`.
    ///
    /// If starting fails the grant is handed back before the error is
    /// returned.
    pub async fn spawn(grant: BorrowGrant<'a>, routine: Box<dyn CommandRoutine>) -> Result<Self> {
        let mut session = Self {
            prompt_depth: grant.prompt_depth(),
            abort_depth: grant.abort_depth(),
            grant: Some(grant),
            routine,
            command: String::new(),
            state: SessionState::Created,
        };

        // On error the session drops while still Created, which hands the
        // grant back without complaint.
        let Some(grant) = session.grant.as_mut() else {
            return Err(session.not_running());
        };
        let command = session.routine.start(grant).await?;
        debug!("session: started {:?}", command);
        session.command = command;
        session.state = SessionState::Running;
        Ok(session)
    }

    fn not_running(&self) -> Error {
        SessionError::violation(format!(
            "session for {:?} is {:?}, not running",
            self.command, self.state
        ))
        .into()
    }

    /// Wait for the command to complete and return `(exit_code, output)`.
    ///
    /// The channel is handed back whatever the outcome. Calling this on a
    /// session that is not running is a protocol violation.
    pub async fn terminate(&mut self) -> Result<(i32, String)> {
        if self.state != SessionState::Running {
            return Err(self.not_running());
        }
        self.state = SessionState::Terminated;
        let Some(mut grant) = self.grant.take() else {
            return Err(self.not_running());
        };

        let result = self.routine.finish(&mut grant).await;
        let balanced = self.restore_depths(&mut grant);
        grant.release();

        let (exit_code, output) = result?;
        if !balanced {
            return Err(SessionError::violation(format!(
                "pattern stacks were left unbalanced while {:?} ran (exit code {} discarded)",
                self.command, exit_code
            ))
            .into());
        }
        debug!("session: {:?} exited with {}", self.command, exit_code);
        Ok((exit_code, output))
    }

    /// Like [`terminate`](Self::terminate), but a nonzero exit code is an error.
    pub async fn terminate0(&mut self) -> Result<String> {
        let (exit_code, output) = self.terminate().await?;
        if exit_code != 0 {
            return Err(ShellError::CommandFailed {
                command: self.command.clone(),
                exit_code,
                output,
            }
            .into());
        }
        Ok(output)
    }

    /// End a running session because of `error` and hand it back.
    ///
    /// The routine gets one chance to clean up, then the channel is
    /// released and `error` is returned unchanged. On a session that is no
    /// longer running this only returns `error`.
    pub async fn forward_error(&mut self, error: Error) -> Error {
        if self.state != SessionState::Running {
            return error;
        }
        self.state = SessionState::Terminated;
        if let Some(mut grant) = self.grant.take() {
            debug!("session: aborting {:?}: {}", self.command, error);
            self.routine.abort(&mut grant, &error).await;
            self.restore_depths(&mut grant);
            grant.release();
        }
        error
    }

    fn restore_depths(&self, channel: &mut Channel) -> bool {
        let balanced = channel.prompt_depth() == self.prompt_depth
            && channel.abort_depth() == self.abort_depth;
        if !balanced {
            error!(
                "session: {:?} left prompt/abort depth {}/{} (expected {}/{})",
                self.command,
                channel.prompt_depth(),
                channel.abort_depth(),
                self.prompt_depth,
                self.abort_depth
            );
            channel.truncate_prompts(self.prompt_depth);
            channel.truncate_aborts(self.abort_depth);
        }
        balanced
    }

    /// The command line as accepted by the remote.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True between a successful spawn and termination.
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// The borrowed channel, while the session runs.
    ///
    /// Prompts or abort patterns pushed here must be popped again before
    /// the session is terminated, otherwise termination reports a protocol
    /// violation. [`Channel::with_prompt`] pops automatically.
    pub fn channel(&mut self) -> Result<&mut Channel> {
        if self.state != SessionState::Running {
            return Err(self.not_running());
        }
        self.grant
            .as_deref_mut()
            .ok_or_else(|| SessionError::violation("session has no channel").into())
    }

    /// Send raw bytes to the running program.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel()?.send(data).await
    }

    /// Send a line to the running program.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.channel()?.send_line(line).await
    }

    /// Send a line and wait for its echo.
    pub async fn send_line_read_back(&mut self, line: &str) -> Result<()> {
        self.channel()?.send_line_read_back(line).await
    }

    /// Send a control character, e.g. `'C'` to interrupt the program.
    pub async fn send_control(&mut self, key: char) -> Result<()> {
        self.channel()?.send_control(key).await
    }

    /// Receive whatever the program printed.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.channel()?.receive(timeout).await
    }

    /// Read up to the channel's innermost prompt.
    ///
    /// Push the program's own prompt through [`channel`](Self::channel)
    /// first, preferably with [`Channel::with_prompt`]; the shell prompt
    /// counts as an abort while the command runs.
    pub async fn read_until_prompt(&mut self) -> Result<String> {
        self.channel()?.read_until_prompt().await
    }

    /// Read up to `prompt`, e.g. the prompt of a debugger started by the command.
    pub async fn read_until(&mut self, prompt: &PromptSpec, timeout: Duration) -> Result<String> {
        self.channel()?.read_until(prompt, timeout).await
    }
}

impl Drop for CommandSession<'_> {
    fn drop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        error!(
            "session: {:?} went out of scope without being terminated",
            self.command
        );
        let message = format!("session for {:?} was never terminated", self.command);
        if let Some(mut grant) = self.grant.take() {
            self.restore_depths(&mut grant);
            grant.poison(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::testing::FakeShell;
    use tokio_test::assert_ok;

    fn routine(command: &str) -> Box<dyn CommandRoutine> {
        Box::new(PosixCommandRoutine::new(command, FakeShell::prompt()))
    }

    async fn fake_channel() -> Channel {
        let mut channel = FakeShell::spawn(ChannelConfig::default());
        channel.set_base_prompt(FakeShell::prompt());
        channel
    }

    #[tokio::test]
    async fn test_false_then_terminate0_fails() {
        let mut channel = fake_channel().await;

        let mut session = assert_ok!(
            CommandSession::spawn(assert_ok!(channel.borrow()), routine("false")).await
        );
        assert!(session.is_running());
        let err = session.terminate0().await.unwrap_err();
        assert!(err.is_command_failed());
        assert_eq!(err.exit_code(), Some(1));
        drop(session);

        let mut session = assert_ok!(
            CommandSession::spawn(assert_ok!(channel.borrow()), routine("false")).await
        );
        assert_eq!(assert_ok!(session.terminate().await), (1, String::new()));
    }

    #[tokio::test]
    async fn test_terminate_twice_is_a_violation() {
        let mut channel = fake_channel().await;
        let mut session = assert_ok!(
            CommandSession::spawn(assert_ok!(channel.borrow()), routine("echo hi")).await
        );
        assert_eq!(assert_ok!(session.terminate().await), (0, "hi\n".to_string()));
        assert_eq!(session.state(), SessionState::Terminated);

        assert!(session.terminate().await.unwrap_err().is_protocol_violation());
        assert!(session.terminate0().await.unwrap_err().is_protocol_violation());
        assert!(session.send_line("ls").await.unwrap_err().is_protocol_violation());
    }

    #[tokio::test]
    async fn test_start_failure_returns_channel() {
        let mut channel = fake_channel().await;
        channel.set_timeout(Duration::from_millis(100));
        {
            let grant = assert_ok!(channel.borrow());
            // Never echoed: the fake shell only echoes complete lines.
            let routine = Box::new(PosixCommandRoutine::new("echo 'open", FakeShell::prompt()));
            let err = CommandSession::spawn(grant, routine).await.err().unwrap();
            assert!(err.is_timeout());
        }
        assert!(!channel.is_borrowed());
        assert_eq!(channel.abort_depth(), 0);
    }

    #[tokio::test]
    async fn test_drop_while_running_poisons_once() {
        let mut channel = fake_channel().await;
        {
            let _session = assert_ok!(
                CommandSession::spawn(assert_ok!(channel.borrow()), routine("true")).await
            );
        }
        assert_eq!(channel.abort_depth(), 0);

        let err = channel.borrow().err().unwrap();
        assert!(err.is_protocol_violation());
        assert_ok!(channel.borrow());
    }

    #[tokio::test]
    async fn test_leftover_prompt_is_a_violation() {
        let mut channel = fake_channel().await;
        let depth = channel.prompt_depth();
        let mut session = assert_ok!(
            CommandSession::spawn(assert_ok!(channel.borrow()), routine("echo hi")).await
        );
        assert_ok!(session.channel()).push_prompt(PromptSpec::literal("(gdb) "));

        let err = session.terminate().await.unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(err.to_string().contains("unbalanced"));
        assert!(err.to_string().contains("exit code 0"));
        drop(session);

        assert_eq!(channel.prompt_depth(), depth);
        let mut session = assert_ok!(
            CommandSession::spawn(assert_ok!(channel.borrow()), routine("true")).await
        );
        {
            let ch = assert_ok!(session.channel());
            let _guard = ch.with_prompt(PromptSpec::literal("(gdb) "));
        }
        assert_eq!(assert_ok!(session.terminate0().await), "");
    }

    #[tokio::test]
    async fn test_forward_error_runs_cleanup() {
        let mut channel = fake_channel().await;
        let mut session = assert_ok!(
            CommandSession::spawn(assert_ok!(channel.borrow()), routine("echo Hello World")).await
        );

        let err = session
            .read_until(&PromptSpec::literal("Lorem Ipsum"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_unexpected_abort());
        let err = session.forward_error(err).await;
        assert!(err.is_unexpected_abort());
        drop(session);

        assert_eq!(channel.abort_depth(), 0);
        assert!(channel.pending().is_empty());
        let mut session = assert_ok!(
            CommandSession::spawn(assert_ok!(channel.borrow()), routine("true")).await
        );
        assert_eq!(assert_ok!(session.terminate0().await), "");
    }
}
