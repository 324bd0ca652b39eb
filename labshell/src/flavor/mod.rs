//! Shell flavours.
//!
//! A [`ShellFlavor`] bundles everything that differs between shell
//! variants: which features the shell has, how it is initialised, how a
//! nested shell is started and which [`CommandRoutine`] drives commands.
//! Features are described by an explicit [`CapabilitySet`] and queried by
//! name, never by inspecting types.

mod ash;
mod bash;
mod registry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, PromptSpec, SyncConfig};
use crate::error::{Result, ShellError};
use crate::session::{CommandRoutine, PosixCommandRoutine};
use crate::shell::{Arg, escape_posix};

pub use ash::Ash;
pub use bash::Bash;
pub use registry::{FlavorRegistry, lookup, register};

/// Prompt installed by the built-in flavours.
pub const PROMPT: &str = "LABSH-TEFCU0hFTEwK$ ";

/// A feature a shell may or may not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// The `printf` builtin, used to read variables verbatim.
    Printf,
    /// Background jobs with `&`.
    JobControl,
    /// `&&` and `||` command lists.
    ControlFlow,
    /// Interactive sessions via `run`.
    Interactive,
    /// Nested shells via `subshell`.
    Subshell,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Printf,
        Capability::JobControl,
        Capability::ControlFlow,
        Capability::Interactive,
        Capability::Subshell,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Printf => "printf",
            Capability::JobControl => "job_control",
            Capability::ControlFlow => "control_flow",
            Capability::Interactive => "interactive",
            Capability::Subshell => "subshell",
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown capability '{s}'"))
    }
}

/// Set of [`Capability`] values, computed once per flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        CapabilitySet(0)
    }

    pub const fn all() -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < Capability::ALL.len() {
            bits |= Capability::ALL[i].bit();
            i += 1;
        }
        CapabilitySet(bits)
    }

    pub const fn with(self, capability: Capability) -> Self {
        CapabilitySet(self.0 | capability.bit())
    }

    pub const fn without(self, capability: Capability) -> Self {
        CapabilitySet(self.0 & !capability.bit())
    }

    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Look a capability up by its name, e.g. `"job_control"`.
    pub fn supports(self, name: &str) -> bool {
        name.parse().is_ok_and(|c| self.contains(c))
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(CapabilitySet::empty(), CapabilitySet::with)
    }
}

/// Behavior of one shell variant.
#[async_trait]
pub trait ShellFlavor: Send + Sync {
    /// Registry name, e.g. `"bash"`.
    fn name(&self) -> &str;

    /// What this shell can do.
    fn capabilities(&self) -> CapabilitySet;

    /// The prompt installed by [`init`](ShellFlavor::init).
    fn prompt(&self) -> PromptSpec {
        PromptSpec::literal(PROMPT)
    }

    /// Command that starts a nested shell of this flavour.
    fn subshell_command(&self) -> Vec<Arg>;

    /// Render arguments as a command line.
    fn escape(&self, args: Vec<Arg>) -> Result<String> {
        escape_posix(self.name(), self.capabilities(), args)
    }

    /// Bring a freshly started shell into a known state.
    async fn init(&self, channel: &mut Channel, sync: &SyncConfig) -> Result<()>;

    /// Routine driving `command` through a [`CommandSession`](crate::CommandSession).
    fn command_routine(&self, command: String) -> Box<dyn CommandRoutine> {
        Box::new(PosixCommandRoutine::new(command, self.prompt()))
    }
}

/// Run a setup command and discard its output.
pub async fn run_quiet(channel: &mut Channel, line: &str) -> Result<()> {
    let prompt = PromptSpec::literal(PROMPT);
    let timeout = channel.timeout();
    channel.send_line_read_back(line).await?;
    channel.read_until(&prompt, timeout).await?;
    Ok(())
}

/// Install [`PROMPT`].
///
/// The assignment is split by quotes so that its echo never contains the
/// prompt itself.
pub async fn install_prompt(channel: &mut Channel) -> Result<()> {
    let (head, tail) = PROMPT.split_at(6);
    run_quiet(channel, &format!("PROMPT_COMMAND=''; PS1='{head}''{tail}'")).await
}

/// Built-in flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellKind {
    Bash,
    Ash,
}

impl ShellKind {
    pub fn name(self) -> &'static str {
        match self {
            ShellKind::Bash => "bash",
            ShellKind::Ash => "ash",
        }
    }

    pub fn flavor(self) -> Arc<dyn ShellFlavor> {
        match self {
            ShellKind::Bash => Arc::new(Bash),
            ShellKind::Ash => Arc::new(Ash),
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShellKind {
    type Err = ShellError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bash" => Ok(ShellKind::Bash),
            "ash" | "busybox" => Ok(ShellKind::Ash),
            _ => Err(ShellError::UnknownShell {
                name: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set() {
        let set: CapabilitySet = [Capability::Printf, Capability::Subshell].into_iter().collect();
        assert!(set.contains(Capability::Printf));
        assert!(!set.contains(Capability::JobControl));
        assert!(set.supports("subshell"));
        assert!(!set.supports("teleport"));
        assert_eq!(set.iter().count(), 2);
        assert_eq!(CapabilitySet::all().iter().count(), Capability::ALL.len());
    }

    #[test]
    fn test_capability_names_round_trip_through_serde() {
        for capability in Capability::ALL {
            let json = serde_json::to_string(&capability).unwrap();
            assert_eq!(json, format!("\"{}\"", capability.name()));
            assert_eq!(capability.name().parse::<Capability>(), Ok(capability));
        }
    }

    #[test]
    fn test_shell_kind() {
        assert_eq!("busybox".parse::<ShellKind>().unwrap(), ShellKind::Ash);
        assert!("fish".parse::<ShellKind>().is_err());
        assert_eq!(ShellKind::Bash.flavor().name(), "bash");
        let kind: ShellKind = serde_json::from_str("\"ash\"").unwrap();
        assert_eq!(kind, ShellKind::Ash);
    }

    #[test]
    fn test_prompt_assignment_hides_prompt() {
        let (head, tail) = PROMPT.split_at(6);
        let line = format!("PROMPT_COMMAND=''; PS1='{head}''{tail}'");
        assert!(!line.contains(PROMPT));
    }
}
