//! Builder for shells.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use super::Shell;
use crate::channel::{AbortPolicy, Channel, ChannelConfig, SyncConfig};
use crate::error::{Result, ShellError};
use crate::flavor::{self, ShellFlavor, ShellKind};
use crate::transport::{PtyConfig, PtyTransport, SshConfig, SshTransport, Transport};

enum FlavorChoice {
    Kind(ShellKind),
    Named(String),
    Custom(Arc<dyn ShellFlavor>),
}

/// Builder for constructing a [`Shell`] on one of the transports.
///
/// # Example
///
/// ```rust,no_run
/// use labshell::{PtyConfig, ShellBuilder, ShellKind};
///
/// # async fn example() -> Result<(), labshell::Error> {
/// let mut sh = ShellBuilder::new(ShellKind::Bash)
///     .name("host")
///     .spawn_local(PtyConfig::bash())
///     .await?;
///
/// let kernel = sh.exec0(["uname", "-r"]).await?;
/// println!("{}", kernel.trim());
/// sh.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ShellBuilder {
    name: Option<String>,
    flavor: FlavorChoice,
    channel: ChannelConfig,
    sync: SyncConfig,
    workdir: Option<PathBuf>,
}

impl ShellBuilder {
    /// Start building a shell of a built-in flavour.
    pub fn new(kind: ShellKind) -> Self {
        Self::with_choice(FlavorChoice::Kind(kind))
    }

    /// Use the flavour registered under `name`.
    pub fn flavor_name(name: impl Into<String>) -> Self {
        Self::with_choice(FlavorChoice::Named(name.into()))
    }

    /// Use a custom flavour.
    pub fn flavor(flavor: Arc<dyn ShellFlavor>) -> Self {
        Self::with_choice(FlavorChoice::Custom(flavor))
    }

    fn with_choice(flavor: FlavorChoice) -> Self {
        Self {
            name: None,
            flavor,
            channel: ChannelConfig::default(),
            sync: SyncConfig::default(),
            workdir: None,
        }
    }

    /// Set the name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the default read timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.channel.timeout = timeout;
        self
    }

    /// Set how many trailing bytes are searched for prompts.
    pub fn search_depth(mut self, depth: usize) -> Self {
        self.channel.search_depth = depth;
        self
    }

    /// Set the tie-break between prompts and abort patterns.
    pub fn abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.channel.abort_policy = policy;
        self
    }

    /// Enable or disable ANSI escape stripping.
    pub fn strip_ansi(mut self, strip: bool) -> Self {
        self.channel.strip_ansi = strip;
        self
    }

    /// Enable or disable carriage return removal.
    pub fn strip_carriage_returns(mut self, strip: bool) -> Self {
        self.channel.strip_carriage_returns = strip;
        self
    }

    /// Replace the whole channel configuration.
    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel = config;
        self
    }

    /// Set the interval between readiness probes.
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync.probe_interval = interval;
        self
    }

    /// Set how long to wait for the shell to become ready.
    pub fn sync_deadline(mut self, deadline: Duration) -> Self {
        self.sync.deadline = Some(deadline);
        self
    }

    /// Set the directory returned by [`Shell::workdir`].
    pub fn workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = Some(path.into());
        self
    }

    fn validate(&self) -> Result<()> {
        fn invalid(message: &str) -> Result<()> {
            Err(ShellError::InvalidConfig {
                message: message.to_string(),
            }
            .into())
        }
        if self.channel.timeout.is_zero() {
            return invalid("timeout must be greater than zero");
        }
        if self.channel.search_depth == 0 {
            return invalid("search depth must be greater than zero");
        }
        if self.sync.probe_interval.is_zero() {
            return invalid("sync interval must be greater than zero");
        }
        Ok(())
    }

    fn resolve_flavor(&self) -> Result<Arc<dyn ShellFlavor>> {
        match &self.flavor {
            FlavorChoice::Kind(kind) => Ok(kind.flavor()),
            FlavorChoice::Named(name) => flavor::lookup(name),
            FlavorChoice::Custom(flavor) => Ok(flavor.clone()),
        }
    }

    /// Spawn a local program on a pseudo-terminal and attach to it.
    pub async fn spawn_local(self, config: PtyConfig) -> Result<Shell> {
        self.validate()?;
        let name = self.name.clone().unwrap_or_else(|| config.program.clone());
        let transport = PtyTransport::spawn(&config)?;
        self.name(name).attach(transport).await
    }

    /// Connect over SSH and attach to the login shell.
    pub async fn connect_ssh(self, config: SshConfig) -> Result<Shell> {
        self.validate()?;
        let name = self.name.clone().unwrap_or_else(|| config.socket_addr());
        let transport = SshTransport::connect(config).await?;
        self.name(name).attach(transport).await
    }

    /// Attach to a shell running on an arbitrary transport.
    pub async fn attach<T: Transport + 'static>(self, transport: T) -> Result<Shell> {
        self.validate()?;
        let flavor = self.resolve_flavor()?;
        let name = self.name.unwrap_or_else(|| flavor.name().to_string());
        debug!("shell {}: attaching ({})", name, flavor.name());

        let channel = Channel::new(transport, self.channel);
        let mut shell = Shell::attach_with(name, channel, flavor, self.sync).await?;
        if let Some(workdir) = self.workdir {
            shell.set_workdir(workdir);
        }
        Ok(shell)
    }
}
