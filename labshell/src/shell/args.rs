//! Command arguments and their shell rendering.

use std::borrow::Cow;
use std::path::Path;

use crate::error::{Result, ShellError};
use crate::flavor::{Capability, CapabilitySet};

/// One element of a command line.
///
/// Plain strings become [`Arg::Str`] and are quoted; everything else is
/// explicit so that shell syntax never sneaks in through user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// A word, quoted as needed.
    Str(String),

    /// Inserted verbatim.
    Raw(String),

    /// Expansion of an environment variable, `"${NAME}"`.
    Env(String),

    /// `|`
    Pipe,

    /// `&&`
    AndThen,

    /// `||`
    OrElse,

    /// `;`
    Then,

    /// `&`, needs job control.
    Background,

    /// `>path`
    RedirStdout(String),

    /// `2>path`
    RedirStderr(String),
}

impl Arg {
    pub fn raw(text: impl Into<String>) -> Self {
        Arg::Raw(text.into())
    }

    pub fn env(name: impl Into<String>) -> Self {
        Arg::Env(name.into())
    }

    pub fn stdout_to(path: impl AsRef<Path>) -> Self {
        Arg::RedirStdout(path.as_ref().to_string_lossy().into_owned())
    }

    pub fn stderr_to(path: impl AsRef<Path>) -> Self {
        Arg::RedirStderr(path.as_ref().to_string_lossy().into_owned())
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Arg::Str(s.clone())
    }
}

impl From<&Path> for Arg {
    fn from(path: &Path) -> Self {
        Arg::Str(path.to_string_lossy().into_owned())
    }
}

/// Quote a single word for a POSIX shell.
pub fn quote(word: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(word))
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Render `args` as a POSIX command line.
///
/// `&&` and `||` need [`Capability::ControlFlow`], `&` needs
/// [`Capability::JobControl`].
pub fn escape_posix<I>(shell: &str, capabilities: CapabilitySet, args: I) -> Result<String>
where
    I: IntoIterator<Item = Arg>,
{
    let require = |capability: Capability| -> Result<()> {
        if capabilities.contains(capability) {
            Ok(())
        } else {
            Err(ShellError::Unsupported {
                shell: shell.to_string(),
                capability: capability.to_string(),
            }
            .into())
        }
    };

    let mut words = Vec::new();
    for arg in args {
        let word = match arg {
            Arg::Str(s) => quote(&s).into_owned(),
            Arg::Raw(s) => s,
            Arg::Env(name) => {
                if !is_valid_name(&name) {
                    return Err(ShellError::InvalidConfig {
                        message: format!("'{name}' is not a valid variable name"),
                    }
                    .into());
                }
                format!("\"${{{name}}}\"")
            }
            Arg::Pipe => "|".to_string(),
            Arg::AndThen => {
                require(Capability::ControlFlow)?;
                "&&".to_string()
            }
            Arg::OrElse => {
                require(Capability::ControlFlow)?;
                "||".to_string()
            }
            Arg::Then => ";".to_string(),
            Arg::Background => {
                require(Capability::JobControl)?;
                "&".to_string()
            }
            Arg::RedirStdout(path) => format!(">{}", quote(&path)),
            Arg::RedirStderr(path) => format!("2>{}", quote(&path)),
        };
        words.push(word);
    }
    Ok(words.join(" "))
}
