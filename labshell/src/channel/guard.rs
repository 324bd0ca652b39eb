//! Scoped access to a channel.

use std::ops::{Deref, DerefMut};

use log::trace;

use super::{Channel, PromptSpec};

enum Stack {
    Prompt,
    Abort,
}

/// Keeps a pattern pushed while alive and pops it on drop.
///
/// Dropping truncates the stack back to the depth it had before the push,
/// so anything pushed through the guard afterwards goes away too.
pub struct PatternGuard<'a> {
    channel: &'a mut Channel,
    stack: Stack,
    depth: usize,
}

impl<'a> PatternGuard<'a> {
    pub(crate) fn prompt(channel: &'a mut Channel, prompt: PromptSpec) -> Self {
        let depth = channel.prompt_depth();
        channel.push_prompt(prompt);
        Self {
            channel,
            stack: Stack::Prompt,
            depth,
        }
    }

    pub(crate) fn abort(channel: &'a mut Channel, pattern: PromptSpec) -> Self {
        let depth = channel.abort_depth();
        channel.push_abort(pattern);
        Self {
            channel,
            stack: Stack::Abort,
            depth,
        }
    }
}

impl Deref for PatternGuard<'_> {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        self.channel
    }
}

impl DerefMut for PatternGuard<'_> {
    fn deref_mut(&mut self) -> &mut Channel {
        self.channel
    }
}

impl Drop for PatternGuard<'_> {
    fn drop(&mut self) {
        match self.stack {
            Stack::Prompt => self.channel.truncate_prompts(self.depth),
            Stack::Abort => self.channel.truncate_aborts(self.depth),
        }
    }
}

/// Exclusive loan of a [`Channel`].
///
/// The grant owns the real channel while the origin holds a placeholder
/// that refuses every operation. Dropping the grant, or calling
/// [`release`](BorrowGrant::release), moves the channel back exactly once.
/// A grant that is leaked with `mem::forget` leaves the origin inert for
/// good.
pub struct BorrowGrant<'a> {
    origin: &'a mut Channel,
    channel: Channel,
}

impl<'a> BorrowGrant<'a> {
    pub(crate) fn new(origin: &'a mut Channel, channel: Channel) -> Self {
        Self { origin, channel }
    }

    /// Hand the channel back to its origin.
    pub fn release(self) {
        drop(self);
    }

    /// Mark the channel so its next operation reports a protocol violation.
    pub(crate) fn poison(&mut self, message: impl Into<String>) {
        self.channel.poison(message);
    }
}

impl Deref for BorrowGrant<'_> {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl DerefMut for BorrowGrant<'_> {
    fn deref_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }
}

impl Drop for BorrowGrant<'_> {
    fn drop(&mut self) {
        // The placeholder ends up in `self.channel` and is dropped with it.
        std::mem::swap(self.origin, &mut self.channel);
        trace!("channel: returned to owner");
    }
}
