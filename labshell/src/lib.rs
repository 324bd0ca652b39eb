//! # Labshell
//!
//! Async shell sessions for hardware-in-the-loop test automation.
//!
//! Labshell drives an interactive POSIX shell on the far end of a byte
//! stream (a local pseudo-terminal, an SSH session or any other
//! [`Transport`](transport::Transport)) and turns it into something a test
//! can call like a function: run a command, get its output and exit code.
//!
//! ## Features
//!
//! - Prompt-delimited reads with a prompt stack and abort patterns
//! - Readiness probing for shells that are still booting
//! - Exclusive channel borrowing for long-running interactive commands
//! - Quoting-safe argument lists, nested subshells and environment access
//! - Shell flavours (bash, busybox ash) with a registry for custom ones
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labshell::{PtyConfig, ShellBuilder, ShellKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), labshell::Error> {
//!     let mut sh = ShellBuilder::new(ShellKind::Bash)
//!         .spawn_local(PtyConfig::bash())
//!         .await?;
//!
//!     let (code, output) = sh.exec(["uname", "-a"]).await?;
//!     println!("{code}: {output}");
//!
//!     let mut sub = sh.subshell().await?;
//!     sub.set_env("BOARD", "rpi4").await?;
//!     sub.exit().await?;
//!
//!     sh.close().await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod error;
pub mod flavor;
pub mod session;
pub mod shell;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use channel::{
    AbortPolicy, BorrowGrant, Channel, ChannelConfig, ChannelState, PromptSpec, SyncConfig,
};
pub use error::{Error, Result};
pub use flavor::{Capability, CapabilitySet, ShellFlavor, ShellKind};
pub use session::{CommandRoutine, CommandSession, SessionState};
pub use shell::{Arg, Shell, ShellBuilder, Subshell};
pub use transport::{
    AuthMethod, LoopbackTransport, PtyConfig, PtyTransport, SshConfig, SshTransport, Transport,
};
