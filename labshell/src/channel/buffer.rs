//! Receive buffer with tail-limited pattern search.
//!
//! Prompts are only searched for in the last `search_depth` bytes of the
//! buffer. A command that dumps megabytes of log output would otherwise
//! make every prompt check rescan everything received so far.
//!
//! Abort patterns can show up anywhere in the output, so they are searched
//! incrementally instead: a watermark records how far the buffer has been
//! scanned without a hit, and later scans only cover the new bytes plus
//! enough overlap for a literal split across two chunks.

use std::borrow::Cow;
use std::ops::Range;

use bytes::{Buf, BytesMut};
use memchr::memmem;

use super::patterns::PromptSpec;

/// Buffer for accumulating remote output and searching it for patterns.
///
/// Incoming chunks are normalized on the way in: ANSI escape sequences and
/// carriage returns are removed unless disabled. Everything above the
/// buffer sees the normalized bytes.
#[derive(Debug)]
pub struct PatternBuffer {
    buffer: BytesMut,

    /// How many bytes from the end to search for prompts.
    search_depth: usize,

    /// Bytes already searched for abort patterns without a match.
    abort_scanned: usize,

    strip_ansi: bool,
    strip_carriage_returns: bool,
}

impl PatternBuffer {
    /// Create a buffer that searches the last `search_depth` bytes.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            search_depth,
            abort_scanned: 0,
            strip_ansi: true,
            strip_carriage_returns: true,
        }
    }

    /// Choose which normalizations apply to incoming data.
    ///
    /// The ANSI stripper also swallows bare carriage returns, so keeping
    /// them requires turning both off.
    pub fn with_normalization(mut self, strip_ansi: bool, strip_carriage_returns: bool) -> Self {
        self.strip_ansi = strip_ansi;
        self.strip_carriage_returns = strip_carriage_returns;
        self
    }

    /// Append a received chunk after normalizing it.
    pub fn extend(&mut self, data: &[u8]) {
        let cleaned: Cow<'_, [u8]> = if self.strip_ansi {
            Cow::Owned(strip_ansi_escapes::strip(data))
        } else {
            Cow::Borrowed(data)
        };

        if self.strip_carriage_returns {
            self.buffer
                .extend(cleaned.iter().copied().filter(|&b| b != b'\r'));
        } else {
            self.buffer.extend_from_slice(&cleaned);
        }
    }

    /// Offset where the searched tail starts.
    pub fn tail_start(&self) -> usize {
        self.buffer.len().saturating_sub(self.search_depth)
    }

    /// The searched tail.
    pub fn tail(&self) -> &[u8] {
        &self.buffer[self.tail_start()..]
    }

    /// Search the tail for a qualifying prompt match.
    ///
    /// The returned range is relative to the whole buffer.
    pub fn find_prompt(&self, prompt: &PromptSpec) -> Option<Range<usize>> {
        let offset = self.tail_start();
        prompt
            .find(self.tail())
            .map(|m| m.start + offset..m.end + offset)
    }

    /// Search the not yet scanned part of the buffer for `pattern`.
    ///
    /// Literal patterns are searched from the watermark minus their length,
    /// regex patterns always cover the whole buffer. The returned range is
    /// relative to the whole buffer.
    pub fn find_abort(&self, pattern: &PromptSpec) -> Option<Range<usize>> {
        let offset = match pattern.literal_len() {
            Some(len) => self.abort_scanned.saturating_sub(len.saturating_sub(1)),
            None => 0,
        };
        pattern
            .find_anywhere(&self.buffer[offset..])
            .map(|m| m.start + offset..m.end + offset)
    }

    /// Record that every abort pattern was searched for up to the end.
    pub fn mark_aborts_scanned(&mut self) {
        self.abort_scanned = self.buffer.len();
    }

    /// Forget the watermark, e.g. after a new abort pattern was installed.
    pub fn reset_abort_scan(&mut self) {
        self.abort_scanned = 0;
    }

    /// Search the whole buffer for the terminal echo of `line`.
    ///
    /// An echo is `line` followed by a line ending. Returns the offset just
    /// past that line ending.
    pub fn find_echo(&self, line: &[u8]) -> Option<usize> {
        memmem::find_iter(&self.buffer, line).find_map(|start| {
            let rest = &self.buffer[start + line.len()..];
            if rest.starts_with(b"\n") {
                Some(start + line.len() + 1)
            } else if rest.starts_with(b"\r\n") {
                Some(start + line.len() + 2)
            } else {
                None
            }
        })
    }

    /// Remove and return the first `at` bytes.
    pub fn split_to(&mut self, at: usize) -> Vec<u8> {
        let at = at.min(self.buffer.len());
        self.abort_scanned = self.abort_scanned.saturating_sub(at);
        self.buffer.split_to(at).to_vec()
    }

    /// Drop the first `n` bytes.
    pub fn discard(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.abort_scanned = self.abort_scanned.saturating_sub(n);
        self.buffer.advance(n);
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        self.abort_scanned = 0;
        self.buffer.split().to_vec()
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.abort_scanned = 0;
        self.buffer.clear();
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extend() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"Hello, world!");
        assert_eq!(buffer.as_slice(), b"Hello, world!");
    }

    #[test]
    fn test_normalization() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"\x1b[32mGreen text\x1b[0m\r\n");
        assert_eq!(buffer.as_slice(), b"Green text\n");

        let mut raw = PatternBuffer::new(100).with_normalization(false, false);
        raw.extend(b"\x1b[0mok\r\n");
        assert_eq!(raw.as_slice(), b"\x1b[0mok\r\n");
    }

    #[test]
    fn test_tail_search() {
        let mut buffer = PatternBuffer::new(20);
        buffer.extend(&[b'x'; 100]);
        buffer.extend(b"\nboard$ ");

        let prompt = PromptSpec::literal("board$ ");
        assert_eq!(buffer.find_prompt(&prompt), Some(101..108));
    }

    #[test]
    fn test_abort_found_outside_tail() {
        let mut buffer = PatternBuffer::new(10);
        buffer.extend(b"FATAL");
        buffer.extend(&[b'x'; 100]);

        let abort = PromptSpec::literal("FATAL");
        assert_eq!(buffer.find_prompt(&abort), None);
        assert_eq!(buffer.find_abort(&abort), Some(0..5));
    }

    #[test]
    fn test_abort_watermark() {
        let mut buffer = PatternBuffer::new(10);
        let abort = PromptSpec::literal("FATAL");

        buffer.extend(b"all good FA");
        assert_eq!(buffer.find_abort(&abort), None);
        buffer.mark_aborts_scanned();

        // Split across chunks
        buffer.extend(b"TAL error");
        assert_eq!(buffer.find_abort(&abort), Some(9..14));

        buffer.split_to(9);
        assert_eq!(buffer.find_abort(&abort), Some(0..5));
    }

    #[test]
    fn test_abort_watermark_skips_scanned_bytes() {
        let mut buffer = PatternBuffer::new(10);
        buffer.extend(b"old FATAL\n");
        buffer.mark_aborts_scanned();
        buffer.extend(b"new output\n");

        let abort = PromptSpec::literal("FATAL");
        assert_eq!(buffer.find_abort(&abort), None);

        // Regexes always rescan, as does a reset watermark
        let regex = PromptSpec::regex("FA+TAL").unwrap();
        assert_eq!(buffer.find_abort(&regex), Some(4..9));
        buffer.reset_abort_scan();
        assert_eq!(buffer.find_abort(&abort), Some(4..9));
    }

    #[test]
    fn test_find_echo() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"stale\n$ uname\nLinux\n");
        assert_eq!(buffer.find_echo(b"uname"), Some(14));
        assert_eq!(buffer.find_echo(b"Lin"), None);
        buffer.discard(14);
        assert_eq!(buffer.as_slice(), b"Linux\n");
    }

    #[test]
    fn test_split_and_take() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"output$ ");
        assert_eq!(buffer.split_to(6), b"output");
        assert_eq!(buffer.take(), b"$ ");
        assert!(buffer.is_empty());
    }
}
