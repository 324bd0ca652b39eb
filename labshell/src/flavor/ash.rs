use async_trait::async_trait;
use log::debug;

use super::{Capability, CapabilitySet, ShellFlavor, install_prompt, run_quiet};
use crate::channel::{Channel, SyncConfig, wait_for_shell_with};
use crate::error::Result;
use crate::shell::Arg;

/// BusyBox ash, the usual shell on embedded targets.
///
/// No job control. Its line editor cannot be turned off, so init widens
/// the terminal instead to keep long command lines from wrapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ash;

#[async_trait]
impl ShellFlavor for Ash {
    fn name(&self) -> &str {
        "ash"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::all().without(Capability::JobControl)
    }

    fn subshell_command(&self) -> Vec<Arg> {
        vec!["ash".into()]
    }

    async fn init(&self, channel: &mut Channel, sync: &SyncConfig) -> Result<()> {
        wait_for_shell_with(channel, sync).await?;
        install_prompt(channel).await?;
        for line in ["unset HISTFILE", "stty cols 1024", "PS2=''"] {
            run_quiet(channel, line).await?;
        }
        debug!("ash: initialised");
        Ok(())
    }
}
