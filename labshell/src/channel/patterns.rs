//! Prompt and abort pattern matching.

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use memchr::memmem;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

#[derive(Clone)]
enum Pattern {
    Literal(Vec<u8>),
    Regex(Regex),
}

/// A prompt pattern plus how much trailing noise may follow it.
///
/// A match only counts as a prompt if at most `trailing_noise` bytes were
/// received after it. With the default of zero the prompt has to be the
/// last thing the remote sent, which is what a program waiting for input
/// looks like. Whatever trailing noise was allowed is consumed together
/// with the prompt.
///
/// The same type is used for abort patterns. Those match anywhere in the
/// buffered output and ignore the trailing noise bound.
#[derive(Clone)]
pub struct PromptSpec {
    pattern: Pattern,
    trailing_noise: usize,
}

impl PromptSpec {
    /// Match `text` byte for byte.
    pub fn literal(text: impl AsRef<[u8]>) -> Self {
        Self {
            pattern: Pattern::Literal(text.as_ref().to_vec()),
            trailing_noise: 0,
        }
    }

    /// Compile a regex prompt.
    pub fn regex(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(ChannelError::InvalidPattern)?;
        Ok(Self::from_regex(regex))
    }

    /// Wrap an already compiled regex.
    pub fn from_regex(regex: Regex) -> Self {
        Self {
            pattern: Pattern::Regex(regex),
            trailing_noise: 0,
        }
    }

    /// Allow up to `bytes` of output after the match.
    pub fn with_trailing_noise(mut self, bytes: usize) -> Self {
        self.trailing_noise = bytes;
        self
    }

    /// The trailing noise bound.
    pub fn trailing_noise(&self) -> usize {
        self.trailing_noise
    }

    /// Human readable form of the pattern, for logs and errors.
    pub fn as_str(&self) -> Cow<'_, str> {
        match &self.pattern {
            Pattern::Literal(bytes) => String::from_utf8_lossy(bytes),
            Pattern::Regex(regex) => Cow::Borrowed(regex.as_str()),
        }
    }

    /// First match that ends within the trailing noise bound of `data`.
    pub fn find(&self, data: &[u8]) -> Option<Range<usize>> {
        let limit = data.len().saturating_sub(self.trailing_noise);
        self.matches(data).find(|m| m.end >= limit)
    }

    /// First match anywhere in `data`.
    pub fn find_anywhere(&self, data: &[u8]) -> Option<Range<usize>> {
        self.matches(data).next()
    }

    /// Length of a literal pattern, `None` for regexes.
    pub(crate) fn literal_len(&self) -> Option<usize> {
        match &self.pattern {
            Pattern::Literal(needle) => Some(needle.len()),
            Pattern::Regex(_) => None,
        }
    }

    fn matches<'d>(&'d self, data: &'d [u8]) -> Box<dyn Iterator<Item = Range<usize>> + 'd> {
        match &self.pattern {
            Pattern::Literal(needle) if needle.is_empty() => {
                Box::new(std::iter::once(data.len()..data.len()))
            }
            Pattern::Literal(needle) => {
                let len = needle.len();
                Box::new(memmem::find_iter(data, needle).map(move |start| start..start + len))
            }
            Pattern::Regex(regex) => Box::new(regex.find_iter(data).map(|m| m.range())),
        }
    }
}

impl fmt::Debug for PromptSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptSpec")
            .field("pattern", &self.as_str())
            .field("trailing_noise", &self.trailing_noise)
            .finish()
    }
}

impl From<&str> for PromptSpec {
    fn from(text: &str) -> Self {
        Self::literal(text)
    }
}

impl From<Regex> for PromptSpec {
    fn from(regex: Regex) -> Self {
        Self::from_regex(regex)
    }
}

/// Which pattern wins when the expected prompt and an abort pattern both
/// match the same buffered output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// An abort match always wins.
    #[default]
    AbortFirst,

    /// A qualifying prompt always wins.
    PromptFirst,

    /// Whichever match starts first wins; ties go to the abort pattern.
    Earliest,
}

impl FromStr for AbortPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "abort_first" => Ok(AbortPolicy::AbortFirst),
            "prompt_first" => Ok(AbortPolicy::PromptFirst),
            "earliest" => Ok(AbortPolicy::Earliest),
            other => Err(format!("unknown abort policy '{other}'")),
        }
    }
}

/// Result of scanning buffered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scan {
    /// Nothing qualifying yet.
    Pending,

    /// The expected prompt matched at this range.
    Prompt(Range<usize>),

    /// The abort pattern with this index matched at this range.
    Abort(usize, Range<usize>),
}

impl AbortPolicy {
    pub(crate) fn resolve(
        self,
        prompt: Option<Range<usize>>,
        abort: Option<(usize, Range<usize>)>,
    ) -> Scan {
        match (prompt, abort) {
            (None, None) => Scan::Pending,
            (Some(p), None) => Scan::Prompt(p),
            (None, Some((i, a))) => Scan::Abort(i, a),
            (Some(p), Some((i, a))) => match self {
                AbortPolicy::AbortFirst => Scan::Abort(i, a),
                AbortPolicy::PromptFirst => Scan::Prompt(p),
                AbortPolicy::Earliest if p.start < a.start => Scan::Prompt(p),
                AbortPolicy::Earliest => Scan::Abort(i, a),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_must_end_the_buffer() {
        let prompt = PromptSpec::literal("$ ");
        assert_eq!(prompt.find(b"output\n$ "), Some(7..9));
        assert_eq!(prompt.find(b"$ echo hi\n"), None);
    }

    #[test]
    fn test_trailing_noise_bound() {
        let prompt = PromptSpec::literal("READY").with_trailing_noise(4);
        assert_eq!(prompt.find(b"READY\n$ "), Some(0..5));
        assert_eq!(prompt.find(b"READY\nbash$ "), None);
    }

    #[test]
    fn test_picks_occurrence_at_end() {
        let prompt = PromptSpec::literal("# ");
        assert_eq!(prompt.find(b"# comment\n# "), Some(10..12));
        assert_eq!(prompt.find_anywhere(b"# comment\n# "), Some(0..2));
    }

    #[test]
    fn test_regex_prompt() {
        let prompt = PromptSpec::regex(r"\(gdb\) ").unwrap();
        assert_eq!(prompt.find(b"Reading symbols...\n(gdb) "), Some(19..25));
        assert_eq!(prompt.as_str(), r"\(gdb\) ");
        assert!(PromptSpec::regex("(unclosed").is_err());
    }

    #[test]
    fn test_abort_policy_resolution() {
        let prompt = Some(10..12);
        let abort = Some((0, 4..8));

        assert_eq!(
            AbortPolicy::AbortFirst.resolve(prompt.clone(), abort.clone()),
            Scan::Abort(0, 4..8)
        );
        assert_eq!(
            AbortPolicy::PromptFirst.resolve(prompt.clone(), abort.clone()),
            Scan::Prompt(10..12)
        );
        assert_eq!(
            AbortPolicy::Earliest.resolve(prompt.clone(), abort),
            Scan::Abort(0, 4..8)
        );
        assert_eq!(
            AbortPolicy::Earliest.resolve(prompt, Some((1, 11..12))),
            Scan::Prompt(10..12)
        );
        assert_eq!(AbortPolicy::AbortFirst.resolve(None, None), Scan::Pending);
    }

    #[test]
    fn test_abort_policy_names() {
        assert_eq!("earliest".parse::<AbortPolicy>(), Ok(AbortPolicy::Earliest));
        assert!("sometimes".parse::<AbortPolicy>().is_err());
        let parsed: AbortPolicy = serde_json::from_str("\"prompt_first\"").unwrap();
        assert_eq!(parsed, AbortPolicy::PromptFirst);
    }
}
