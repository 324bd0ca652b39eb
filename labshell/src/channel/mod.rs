//! Channel layer: prompt-driven reads on top of a raw transport.
//!
//! A [`Channel`] owns a [`Transport`], a receive buffer and two stacks of
//! patterns. The innermost entry of the prompt stack is what
//! [`Channel::read_until_prompt`] waits for; every entry of the abort stack
//! is a "death string" that ends a read early with
//! [`ChannelError::UnexpectedAbort`].
//!
//! Exclusive access is expressed with [`Channel::borrow`]: the grant holds
//! the real channel and leaves an inert placeholder behind until it is
//! released.

mod buffer;
mod guard;
mod patterns;
mod sync;

use std::fmt;
use std::time::Duration;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{ChannelError, Result, SessionError};
use crate::transport::{Received, Transport};
use patterns::Scan;

pub use buffer::PatternBuffer;
pub use guard::{BorrowGrant, PatternGuard};
pub use patterns::{AbortPolicy, PromptSpec};
pub use sync::{SYNC_MARKER, SyncConfig, wait_for_shell, wait_for_shell_with};

/// Configuration for channel behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Default deadline for prompt reads.
    pub timeout: Duration,

    /// How many trailing bytes are searched for prompts and abort patterns.
    pub search_depth: usize,

    /// Remove ANSI escape sequences from received data.
    pub strip_ansi: bool,

    /// Remove carriage returns from received data.
    pub strip_carriage_returns: bool,

    /// Tie-break between a prompt and an abort pattern matching together.
    pub abort_policy: AbortPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            search_depth: 1000,
            strip_ansi: true,
            strip_carriage_returns: true,
            abort_policy: AbortPolicy::default(),
        }
    }
}

/// Lifecycle state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Usable.
    Open,

    /// The backend hung up or [`Channel::close`] was called.
    Closed,

    /// Placeholder left behind while a [`BorrowGrant`] holds the channel.
    Borrowed,
}

/// Bidirectional byte stream to a remote shell with prompt matching.
pub struct Channel {
    transport: Option<Box<dyn Transport>>,
    state: ChannelState,
    config: ChannelConfig,
    buffer: PatternBuffer,
    prompts: Vec<PromptSpec>,
    aborts: Vec<PromptSpec>,
    poison: Option<String>,
}

impl Channel {
    /// Wrap an open transport.
    pub fn new<T: Transport + 'static>(transport: T, config: ChannelConfig) -> Self {
        Self::from_boxed(Box::new(transport), config)
    }

    /// Wrap an already boxed transport.
    pub fn from_boxed(transport: Box<dyn Transport>, config: ChannelConfig) -> Self {
        let buffer = PatternBuffer::new(config.search_depth)
            .with_normalization(config.strip_ansi, config.strip_carriage_returns);
        Self {
            transport: Some(transport),
            state: ChannelState::Open,
            config,
            buffer,
            prompts: Vec::new(),
            aborts: Vec::new(),
            poison: None,
        }
    }

    fn placeholder(config: ChannelConfig) -> Self {
        Self {
            transport: None,
            state: ChannelState::Borrowed,
            buffer: PatternBuffer::new(0),
            config,
            prompts: Vec::new(),
            aborts: Vec::new(),
            poison: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// True while the channel can be used and the backend is alive.
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
            && self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    /// True for the placeholder left behind by [`Channel::borrow`].
    pub fn is_borrowed(&self) -> bool {
        self.state == ChannelState::Borrowed
    }

    /// Get the configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Get the default timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Set the default timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    /// Received bytes that no read has consumed yet.
    pub fn pending(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Drop any buffered output.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Close the backend. Closing a closed channel is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Borrowed => Err(ChannelError::Borrowed.into()),
            ChannelState::Closed => Ok(()),
            ChannelState::Open => {
                self.state = ChannelState::Closed;
                debug!("channel: closing");
                match self.transport.as_mut() {
                    Some(transport) => transport.close().await,
                    None => Ok(()),
                }
            }
        }
    }

    fn ensure_usable(&mut self) -> Result<()> {
        if let Some(message) = self.poison.take() {
            return Err(SessionError::ProtocolViolation { message }.into());
        }
        match self.state {
            ChannelState::Open => Ok(()),
            ChannelState::Closed => Err(ChannelError::Closed.into()),
            ChannelState::Borrowed => Err(ChannelError::Borrowed.into()),
        }
    }

    pub(crate) fn poison(&mut self, message: impl Into<String>) {
        self.poison = Some(message.into());
    }

    pub(crate) fn clear_poison(&mut self) {
        self.poison = None;
    }

    fn mark_closed(&mut self) {
        if self.state == ChannelState::Open {
            debug!("channel: backend hung up");
            self.state = ChannelState::Closed;
        }
    }

    fn transport_mut(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.transport
            .as_mut()
            .ok_or_else(|| ChannelError::Borrowed.into())
    }

    // ---- sending ----

    /// Send raw bytes.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_usable()?;
        trace!("channel: send {:?}", String::from_utf8_lossy(data));

        let transport = self.transport_mut()?;
        let result = transport.send(data).await;
        let alive = transport.is_open();
        match result {
            Err(_) if !alive => {
                self.mark_closed();
                Err(ChannelError::Closed.into())
            }
            other => other,
        }
    }

    /// Send `line` followed by a newline.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("channel: send line {:?}", line);
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.send(&data).await
    }

    /// Send `line` and wait until the terminal has echoed it back.
    ///
    /// Everything received up to and including the echo is discarded, so
    /// the next read starts with the command's own output.
    pub async fn send_line_read_back(&mut self, line: &str) -> Result<()> {
        self.send_line(line).await?;

        let timeout = self.config.timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(end) = self.buffer.find_echo(line.as_bytes()) {
                self.buffer.discard(end);
                return Ok(());
            }
            if Instant::now() >= deadline {
                debug!("channel: no echo of {:?} within {:?}", line, timeout);
                return Err(ChannelError::Timeout(timeout).into());
            }
            self.fill(deadline).await?;
        }
    }

    /// Send the control character for `key`, e.g. `'C'` for Ctrl-C.
    pub async fn send_control(&mut self, key: char) -> Result<()> {
        let code = control_code(key).ok_or(ChannelError::InvalidControl(key))?;
        self.send(&[code]).await
    }

    // ---- receiving ----

    async fn fill(&mut self, deadline: Instant) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let received = self.transport_mut()?.receive(remaining).await?;
        match received {
            Received::Data(data) => {
                trace!("channel: received {:?}", String::from_utf8_lossy(&data));
                self.buffer.extend(&data);
                Ok(())
            }
            Received::Timeout => Ok(()),
            Received::Eof => {
                self.mark_closed();
                Err(ChannelError::Closed.into())
            }
        }
    }

    /// Return whatever is buffered, or wait up to `timeout` for more.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        if !self.buffer.is_empty() {
            return Ok(self.buffer.take());
        }
        if !timeout.is_zero() {
            self.fill(Instant::now() + timeout).await?;
        }
        if self.buffer.is_empty() {
            return Err(ChannelError::Timeout(timeout).into());
        }
        Ok(self.buffer.take())
    }

    /// Wait for the innermost prompt using the default timeout.
    pub async fn read_until_prompt(&mut self) -> Result<String> {
        self.read_until_prompt_timeout(self.config.timeout).await
    }

    /// Wait for the innermost prompt with an explicit deadline.
    pub async fn read_until_prompt_timeout(&mut self, timeout: Duration) -> Result<String> {
        self.ensure_usable()?;
        let prompt = self
            .prompts
            .last()
            .cloned()
            .ok_or(ChannelError::NoPrompt)?;
        self.read_until(&prompt, timeout).await
    }

    /// Wait until `prompt` matches and return the output before it.
    ///
    /// The prompt and any trailing noise it allows are consumed. If an
    /// abort pattern wins instead, the output before the abort match is
    /// carried in the error and the match itself stays buffered. A zero
    /// timeout only inspects what is already buffered. On timeout nothing
    /// is consumed.
    pub async fn read_until(&mut self, prompt: &PromptSpec, timeout: Duration) -> Result<String> {
        self.ensure_usable()?;
        let deadline = Instant::now() + timeout;

        loop {
            match self.scan(prompt) {
                Scan::Prompt(range) => {
                    let output = self.buffer.split_to(range.start);
                    self.buffer.clear();
                    trace!("channel: matched prompt {:?}", prompt.as_str());
                    return Ok(String::from_utf8_lossy(&output).into_owned());
                }
                Scan::Abort(index, range) => {
                    let pattern = self.aborts[index].as_str().into_owned();
                    let output = self.buffer.split_to(range.start);
                    debug!("channel: abort pattern {:?} matched", pattern);
                    return Err(ChannelError::UnexpectedAbort {
                        pattern,
                        output: String::from_utf8_lossy(&output).into_owned(),
                    }
                    .into());
                }
                Scan::Pending => self.buffer.mark_aborts_scanned(),
            }

            if Instant::now() >= deadline {
                return Err(ChannelError::Timeout(timeout).into());
            }
            self.fill(deadline).await?;
        }
    }

    fn scan(&self, prompt: &PromptSpec) -> Scan {
        let found = self.buffer.find_prompt(prompt);
        let abort = self
            .aborts
            .iter()
            .enumerate()
            .filter_map(|(i, pattern)| self.buffer.find_abort(pattern).map(|m| (i, m)))
            .min_by_key(|(_, m)| m.start);
        self.config.abort_policy.resolve(found, abort)
    }

    // ---- pattern stacks ----

    /// Push a prompt; it becomes the one reads wait for.
    pub fn push_prompt(&mut self, prompt: PromptSpec) {
        trace!("channel: push prompt {:?}", prompt.as_str());
        self.prompts.push(prompt);
    }

    /// Pop the innermost prompt.
    pub fn pop_prompt(&mut self) -> Option<PromptSpec> {
        self.prompts.pop()
    }

    /// Replace the outermost prompt, or install it on an empty stack.
    pub fn set_base_prompt(&mut self, prompt: PromptSpec) {
        match self.prompts.first_mut() {
            Some(base) => *base = prompt,
            None => self.prompts.push(prompt),
        }
    }

    /// The prompt reads currently wait for.
    pub fn current_prompt(&self) -> Option<&PromptSpec> {
        self.prompts.last()
    }

    /// Number of prompts on the stack.
    pub fn prompt_depth(&self) -> usize {
        self.prompts.len()
    }

    /// Push an abort pattern.
    pub fn push_abort(&mut self, pattern: PromptSpec) {
        trace!("channel: push abort {:?}", pattern.as_str());
        self.aborts.push(pattern);
        self.buffer.reset_abort_scan();
    }

    /// Pop the most recently pushed abort pattern.
    pub fn pop_abort(&mut self) -> Option<PromptSpec> {
        self.aborts.pop()
    }

    /// Number of abort patterns installed.
    pub fn abort_depth(&self) -> usize {
        self.aborts.len()
    }

    pub(crate) fn truncate_prompts(&mut self, depth: usize) {
        self.prompts.truncate(depth);
    }

    pub(crate) fn truncate_aborts(&mut self, depth: usize) {
        self.aborts.truncate(depth);
    }

    pub(crate) fn clear_patterns(&mut self) {
        self.prompts.clear();
        self.aborts.clear();
    }

    /// Push a prompt for the lifetime of the returned guard.
    pub fn with_prompt(&mut self, prompt: PromptSpec) -> PatternGuard<'_> {
        PatternGuard::prompt(self, prompt)
    }

    /// Push an abort pattern for the lifetime of the returned guard.
    pub fn with_abort(&mut self, pattern: PromptSpec) -> PatternGuard<'_> {
        PatternGuard::abort(self, pattern)
    }

    // ---- borrowing ----

    /// Move the channel into a grant, leaving an inert placeholder.
    ///
    /// Until the grant is released every operation on `self` fails with
    /// [`ChannelError::Borrowed`]. Releasing or dropping the grant puts the
    /// channel back, including everything still buffered.
    pub fn borrow(&mut self) -> Result<BorrowGrant<'_>> {
        self.ensure_usable()?;
        let placeholder = Channel::placeholder(self.config.clone());
        let inner = std::mem::replace(self, placeholder);
        trace!("channel: lent out");
        Ok(BorrowGrant::new(self, inner))
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("prompts", &self.prompts)
            .field("aborts", &self.aborts)
            .finish_non_exhaustive()
    }
}

fn control_code(key: char) -> Option<u8> {
    let upper = key.to_ascii_uppercase();
    match upper {
        '@'..='_' => Some(upper as u8 & 0x1f),
        '?' => Some(0x7f),
        _ => None,
    }
}
