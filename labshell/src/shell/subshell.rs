use std::ops::{Deref, DerefMut};

use log::{debug, warn};

use super::Shell;
use crate::error::Result;

/// A nested shell, entered with [`Shell::subshell`].
///
/// Derefs to the [`Shell`] it was entered from; commands run through it
/// execute in the nested shell. Environment changes made inside are gone
/// after [`exit`](Subshell::exit).
///
/// Dropping a subshell without calling `exit` leaves the nested shell
/// running. That is logged, and every later operation on the shell fails
/// with a protocol violation until [`Shell::resync`] has left the nested
/// shell again.
pub struct Subshell<'a> {
    shell: &'a mut Shell,
    depth: usize,
    exited: bool,
}

impl<'a> Subshell<'a> {
    pub(crate) fn new(shell: &'a mut Shell, depth: usize) -> Self {
        Self {
            shell,
            depth,
            exited: false,
        }
    }

    /// Leave the nested shell and wait for the outer prompt.
    ///
    /// Fails without sending anything if a subshell nested inside this one
    /// was dropped without exit; this one then counts as dropped too.
    pub async fn exit(mut self) -> Result<()> {
        self.exited = true;
        if let Err(e) = self.shell.ensure_in_sync() {
            self.orphan();
            return Err(e);
        }
        let channel = &mut self.shell.channel;
        channel.truncate_prompts(self.depth);
        channel.send_line_read_back("exit").await?;
        channel.read_until_prompt().await?;
        debug!("shell {}: left subshell", self.shell.name);
        Ok(())
    }

    fn orphan(&mut self) {
        self.shell.channel.truncate_prompts(self.depth);
        self.shell.orphaned += 1;
    }
}

impl Deref for Subshell<'_> {
    type Target = Shell;

    fn deref(&self) -> &Shell {
        self.shell
    }
}

impl DerefMut for Subshell<'_> {
    fn deref_mut(&mut self) -> &mut Shell {
        self.shell
    }
}

impl Drop for Subshell<'_> {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        warn!("shell {}: subshell dropped without exit", self.shell.name);
        self.orphan();
    }
}
