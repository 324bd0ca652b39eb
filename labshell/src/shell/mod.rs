//! Shell execution facade.
//!
//! [`Shell`] is what task code talks to: `exec`, `exec0`, `test`, `env`,
//! `run` for interactive programs and `subshell` for scoped environment
//! changes. Every operation goes through a [`CommandSession`] on a
//! borrowed channel, so at most one command is ever in flight.
//! [`Shell::interactive`] hands the shell to a human for a while.

mod args;
mod builder;
mod subshell;

use std::fmt;
use std::ops::AsyncFnOnce;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use memchr::memmem;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::channel::{Channel, PromptSpec, SyncConfig};
use crate::error::{ChannelError, Result, SessionError, ShellError, TransportError};
use crate::flavor::{Capability, CapabilitySet, ShellFlavor};
use crate::session::CommandSession;

pub use args::{Arg, escape_posix, quote};
pub use builder::ShellBuilder;
pub use subshell::Subshell;

static RESYNC_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory handed out by [`Shell::workdir`] unless configured otherwise.
pub const DEFAULT_WORKDIR: &str = "/tmp/labshell-wd";

/// Prompt of the shell that marks the end of an interactive session.
const INTERACTIVE_END: &str = "LABSHELL-INTERACTIVE-END";
const INTERACTIVE_POLL: Duration = Duration::from_millis(50);

/// An initialised shell on a channel.
pub struct Shell {
    name: String,
    channel: Channel,
    flavor: Arc<dyn ShellFlavor>,
    capabilities: CapabilitySet,
    sync: SyncConfig,
    workdir: PathBuf,
    workdir_ready: bool,
    /// Nested shells whose `Subshell` was dropped without exit.
    orphaned: usize,
}

impl Shell {
    /// Initialise the shell running on `channel`.
    pub async fn attach(
        name: impl Into<String>,
        channel: Channel,
        flavor: Arc<dyn ShellFlavor>,
    ) -> Result<Self> {
        Self::attach_with(name, channel, flavor, SyncConfig::default()).await
    }

    /// [`attach`](Self::attach) with explicit sync tuning.
    pub async fn attach_with(
        name: impl Into<String>,
        mut channel: Channel,
        flavor: Arc<dyn ShellFlavor>,
        sync: SyncConfig,
    ) -> Result<Self> {
        let name = name.into();
        flavor.init(&mut channel, &sync).await?;
        channel.set_base_prompt(flavor.prompt());
        info!("shell {}: ready ({})", name, flavor.name());

        Ok(Self {
            name,
            capabilities: flavor.capabilities(),
            channel,
            flavor,
            sync,
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            workdir_ready: false,
            orphaned: 0,
        })
    }

    /// Name given at construction, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the shell flavour.
    pub fn flavor_name(&self) -> &str {
        self.flavor.name()
    }

    /// Capabilities of the shell flavour.
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(ShellError::Unsupported {
                shell: self.flavor.name().to_string(),
                capability: capability.to_string(),
            }
            .into())
        }
    }

    /// Render arguments as a command line for this shell.
    pub fn escape<I, A>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.flavor.escape(args.into_iter().map(Into::into).collect())
    }

    fn ensure_in_sync(&self) -> Result<()> {
        if self.orphaned > 0 {
            return Err(SessionError::violation(format!(
                "{} subshell(s) left without exit, resync the shell first",
                self.orphaned
            ))
            .into());
        }
        Ok(())
    }

    async fn start(&mut self, command: String) -> Result<CommandSession<'_>> {
        self.ensure_in_sync()?;
        let routine = self.flavor.command_routine(command);
        let grant = self.channel.borrow()?;
        CommandSession::spawn(grant, routine).await
    }

    /// Run a command to completion and return `(exit_code, output)`.
    ///
    /// A nonzero exit code is not an error.
    pub async fn exec<I, A>(&mut self, args: I) -> Result<(i32, String)>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let command = self.escape(args)?;
        debug!("shell {}: exec {}", self.name, command);
        let mut session = self.start(command).await?;
        session.terminate().await
    }

    /// Run a command to completion and return its output.
    ///
    /// Fails with [`ShellError::CommandFailed`] unless the exit code is 0.
    pub async fn exec0<I, A>(&mut self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let command = self.escape(args)?;
        debug!("shell {}: exec0 {}", self.name, command);
        let mut session = self.start(command).await?;
        session.terminate0().await
    }

    /// Run a command and report whether it exited with 0.
    pub async fn test<I, A>(&mut self, args: I) -> Result<bool>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let (exit_code, _) = self.exec(args).await?;
        Ok(exit_code == 0)
    }

    /// Value of an environment variable, empty if unset.
    pub async fn env(&mut self, var: &str) -> Result<String> {
        let mut value = if self.has_capability(Capability::Printf) {
            self.exec0([Arg::raw("printf"), Arg::from("%s\\n"), Arg::env(var)])
                .await?
        } else {
            self.exec0([Arg::raw("echo"), Arg::env(var)]).await?
        };
        if value.ends_with('\n') {
            value.pop();
        }
        Ok(value)
    }

    /// Export an environment variable and return its new value.
    pub async fn set_env(&mut self, var: &str, value: &str) -> Result<String> {
        if !args::is_valid_name(var) {
            return Err(ShellError::InvalidConfig {
                message: format!("'{var}' is not a valid variable name"),
            }
            .into());
        }
        let assignment = format!("{var}={}", quote(value));
        self.exec0([Arg::raw("export"), Arg::Raw(assignment)])
            .await?;
        self.env(var).await
    }

    /// Name of the user the shell runs as.
    pub async fn username(&mut self) -> Result<String> {
        let user = self.env("USER").await?;
        if !user.is_empty() {
            return Ok(user);
        }
        let user = self.exec0(["id", "-un"]).await?;
        Ok(user.trim_end().to_string())
    }

    /// Use `path` as the working directory for test files.
    pub fn set_workdir(&mut self, path: impl Into<PathBuf>) {
        self.workdir = path.into();
        self.workdir_ready = false;
    }

    /// Directory test code may keep files in, created on first use.
    ///
    /// Defaults to [`DEFAULT_WORKDIR`]. Its contents are not managed;
    /// callers must cope with stale or missing files.
    pub async fn workdir(&mut self) -> Result<PathBuf> {
        if !self.workdir_ready {
            let path = self.workdir.clone();
            self.exec0([Arg::raw("mkdir -p"), Arg::from(path.as_path())])
                .await?;
            self.workdir_ready = true;
        }
        Ok(self.workdir.clone())
    }

    /// Start an interactive program.
    ///
    /// The returned session holds the channel until it is terminated; it
    /// must be terminated before it goes out of scope.
    pub async fn run<I, A>(&mut self, args: I) -> Result<CommandSession<'_>>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.require(Capability::Interactive)?;
        let command = self.escape(args)?;
        debug!("shell {}: run {}", self.name, command);
        self.start(command).await
    }

    /// Start an interactive program and drive it with `f`.
    ///
    /// `f` must terminate the session. If it returns an error while the
    /// session is still running, the error is forwarded into the session
    /// before it is returned. If it returns successfully without
    /// terminating, the result is a protocol violation.
    pub async fn run_scoped<I, A, F, T>(&mut self, args: I, f: F) -> Result<T>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
        F: AsyncFnOnce(&mut CommandSession<'_>) -> Result<T>,
    {
        let mut session = self.run(args).await?;
        match f(&mut session).await {
            Ok(_) if session.is_running() => {
                let violation = SessionError::violation(format!(
                    "session for {:?} left its scope while running",
                    session.command()
                ));
                Err(session.forward_error(violation.into()).await)
            }
            Ok(value) => Ok(value),
            Err(e) => Err(session.forward_error(e).await),
        }
    }

    /// Enter a nested shell of the same flavour.
    pub async fn subshell(&mut self) -> Result<Subshell<'_>> {
        let command = self.flavor.subshell_command();
        self.subshell_with(command).await
    }

    /// Enter a nested shell started by a custom command, e.g. `sudo -i bash`.
    ///
    /// The command must start a shell of this flavour.
    pub async fn subshell_with<I, A>(&mut self, args: I) -> Result<Subshell<'_>>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.require(Capability::Subshell)?;
        self.ensure_in_sync()?;
        let command = self.escape(args)?;
        debug!("shell {}: entering subshell {}", self.name, command);

        let depth = self.channel.prompt_depth();
        self.channel.send_line_read_back(&command).await?;
        self.flavor.init(&mut self.channel, &self.sync).await?;
        self.channel.push_prompt(self.flavor.prompt());
        Ok(Subshell::new(self, depth))
    }

    /// Run `f` inside a subshell that is always exited afterwards.
    pub async fn subshell_scoped<F, T>(&mut self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Shell) -> Result<T>,
    {
        let mut sub = self.subshell().await?;
        let result = f(&mut *sub).await;
        let exited = sub.exit().await;
        let value = result?;
        exited?;
        Ok(value)
    }

    /// Bring the shell back in step after a protocol violation.
    ///
    /// Interrupts whatever runs, leaves nested shells whose [`Subshell`]
    /// was dropped, then echoes a unique marker and discards everything up
    /// to the prompt following it.
    pub async fn resync(&mut self) -> Result<()> {
        let marker = format!(
            "LABSHELL-RESYNC-{}",
            RESYNC_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let (head, tail) = marker.split_at(8);
        info!("shell {}: resynchronising", self.name);

        self.channel.clear_poison();
        self.channel.clear_buffer();
        self.channel.send_control('C').await?;
        for _ in 0..self.orphaned {
            self.channel.send_line("exit").await?;
        }
        self.channel.send_line(&format!("echo {head}''{tail}")).await?;

        let prompt: PromptSpec = self.flavor.prompt();
        let timeout = self.channel.timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout(timeout).into());
            }
            let output = self.channel.read_until(&prompt, remaining).await?;
            if output.lines().any(|line| line == marker) {
                debug!("shell {}: back in sync", self.name);
                self.orphaned = 0;
                return Ok(());
            }
        }
    }

    /// Attach the local terminal to the shell until the user exits it.
    ///
    /// Input is forwarded as it arrives on stdin, so the local terminal
    /// stays in line mode. See [`interactive_with`](Self::interactive_with).
    pub async fn interactive(&mut self) -> Result<()> {
        self.interactive_with(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Run an interactive session with explicit input and output streams.
    ///
    /// Two nested shells are started: an outer one whose prompt marks the
    /// end of the session and an inner one for the user. When the user
    /// exits the inner shell, the marker prompt shows up and the outer
    /// shell is left again. End of input does not end the session.
    pub async fn interactive_with<R, W>(&mut self, mut input: R, mut output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.require(Capability::Subshell)?;
        self.ensure_in_sync()?;
        let command = self.escape(self.flavor.subshell_command())?;
        let timeout = self.channel.timeout();

        let (head, tail) = INTERACTIVE_END.split_at(8);
        self.channel.send_line(&command).await?;
        self.channel.send_line(&format!("PS1={head}''{tail}")).await?;
        self.channel
            .read_until(&PromptSpec::literal(INTERACTIVE_END), timeout)
            .await?;

        // The trailing space is quoted apart so the echoed line never
        // contains "> ".
        let prompt = format!("{}: \\w>", self.name);
        self.channel.send_line(&command).await?;
        self.channel
            .send_line(&format!("PS1={}' '", quote(&prompt)))
            .await?;
        self.channel
            .read_until(&PromptSpec::literal("> "), timeout)
            .await?;
        self.channel.send_line("").await?;
        info!("shell {}: entering interactive session", self.name);

        let end = INTERACTIVE_END.as_bytes();
        let mut window: Vec<u8> = Vec::new();
        let mut buf = [0u8; 1024];
        let mut input_open = true;
        loop {
            tokio::select! {
                read = input.read(&mut buf), if input_open => {
                    match read.map_err(TransportError::Io)? {
                        0 => input_open = false,
                        n => self.channel.send(&buf[..n]).await?,
                    }
                }
                received = self.channel.receive(INTERACTIVE_POLL) => {
                    let data = match received {
                        Ok(data) => data,
                        Err(e) if e.is_timeout() => continue,
                        Err(e) => return Err(e),
                    };
                    output.write_all(&data).await.map_err(TransportError::Io)?;
                    output.flush().await.map_err(TransportError::Io)?;

                    window.extend_from_slice(&data);
                    if memmem::find(&window, end).is_some() {
                        break;
                    }
                    let keep = window.len().min(end.len() - 1);
                    window.drain(..window.len() - keep);
                }
            }
        }

        info!("shell {}: left interactive session", self.name);
        self.channel.clear_buffer();
        self.channel.send_line("exit").await?;
        if let Err(e) = self.channel.read_until_prompt().await {
            warn!("shell {}: no prompt after interactive session", self.name);
            return Err(e);
        }
        Ok(())
    }

    /// Hand the channel over to another program, e.g. a serial console client.
    ///
    /// The interrupt key is disabled first so that Ctrl-C reaches the
    /// program instead of the shell, and the shell exits together with
    /// the program. The returned channel has no prompts installed.
    pub async fn into_channel<I, A>(mut self, args: I) -> Result<Channel>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let command = self.escape(args)?;
        self.exec0([Arg::raw("stty -isig")]).await?;
        debug!("shell {}: handing channel to {}", self.name, command);
        self.channel
            .send_line_read_back(&format!("{command}; exit"))
            .await?;

        let mut channel = self.channel;
        channel.clear_patterns();
        Ok(channel)
    }

    /// Close the shell's channel.
    pub async fn close(mut self) -> Result<()> {
        info!("shell {}: closing", self.name);
        self.channel.close().await
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("name", &self.name)
            .field("flavor", &self.flavor.name())
            .field("capabilities", &self.capabilities)
            .field("channel", &self.channel)
            .finish()
    }
}
