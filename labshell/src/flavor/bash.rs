use async_trait::async_trait;
use log::debug;

use super::{CapabilitySet, ShellFlavor, install_prompt, run_quiet};
use crate::channel::{Channel, SyncConfig, wait_for_shell_with};
use crate::error::Result;
use crate::shell::Arg;

/// GNU bash.
///
/// Line editing is switched off during init so that input is echoed by
/// the terminal verbatim instead of being redrawn by readline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bash;

#[async_trait]
impl ShellFlavor for Bash {
    fn name(&self) -> &str {
        "bash"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::all()
    }

    fn subshell_command(&self) -> Vec<Arg> {
        vec!["bash".into(), "--norc".into(), "--noprofile".into()]
    }

    async fn init(&self, channel: &mut Channel, sync: &SyncConfig) -> Result<()> {
        wait_for_shell_with(channel, sync).await?;
        install_prompt(channel).await?;
        for line in ["unset HISTFILE", "set +o emacs", "set +o vi", "PS2=''"] {
            run_quiet(channel, line).await?;
        }
        debug!("bash: initialised");
        Ok(())
    }
}
