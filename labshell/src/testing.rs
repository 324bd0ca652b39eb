//! Scripted POSIX shell for unit tests.
//!
//! Runs on the peer side of a [`LoopbackTransport`] and behaves like a
//! shell on a terminal closely enough for the channel, session and facade
//! logic: input lines are echoed with `\r\n`, quotes and `$VAR` expansions
//! are processed, `PS1` controls the prompt, nested shells get their own
//! variable scope and `cat` copies lines until Ctrl-D.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use crate::channel::{Channel, ChannelConfig, PromptSpec};
use crate::transport::{LoopbackPeer, LoopbackTransport};

pub(crate) const FAKE_PROMPT: &str = "fake$ ";
const NESTED_PROMPT: &str = "sub$ ";

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Op(&'static str),
}

enum Flow {
    Continue,
    Exit,
}

pub(crate) struct FakeShell {
    peer: LoopbackPeer,
    scopes: Vec<HashMap<String, String>>,
    status: i32,
    pending: String,
    cat: bool,
}

impl FakeShell {
    pub(crate) fn prompt() -> PromptSpec {
        PromptSpec::literal(FAKE_PROMPT)
    }

    /// Start a fake shell and return a channel connected to it.
    pub(crate) fn spawn(config: ChannelConfig) -> Channel {
        Channel::new(Self::transport(), config)
    }

    /// Start a fake shell and return the transport connected to it.
    pub(crate) fn transport() -> LoopbackTransport {
        let (transport, peer) = LoopbackTransport::pair();
        let shell = FakeShell {
            peer,
            scopes: vec![HashMap::new()],
            status: 0,
            pending: String::new(),
            cat: false,
        };
        shell.show_prompt();
        tokio::spawn(shell.run());
        transport
    }

    async fn run(mut self) {
        while let Some(chunk) = self.peer.recv().await {
            if !self.input(&chunk) {
                self.peer.hang_up();
                break;
            }
        }
    }

    fn out(&self, text: &str) {
        self.peer.feed(text.replace('\n', "\r\n"));
    }

    fn show_prompt(&self) {
        let default = if self.scopes.len() > 1 {
            NESTED_PROMPT
        } else {
            FAKE_PROMPT
        };
        let prompt = self.var("PS1").unwrap_or(default);
        self.peer.feed(prompt);
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.scopes.last().and_then(|s| s.get(name)).map(String::as_str)
    }

    fn set_var(&mut self, name: &str, value: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value.to_string());
        }
    }

    /// Returns false once the outermost shell exited.
    fn input(&mut self, chunk: &[u8]) -> bool {
        for ch in String::from_utf8_lossy(chunk).chars() {
            match ch {
                '\x03' => {
                    self.pending.clear();
                    self.cat = false;
                    self.status = 130;
                    self.out("^C\n");
                    self.show_prompt();
                }
                '\x04' if self.cat => {
                    self.cat = false;
                    self.status = 0;
                    self.show_prompt();
                }
                '\n' => {
                    self.pending.push('\n');
                    if self.tokenize(&self.pending).is_some() {
                        let line = std::mem::take(&mut self.pending);
                        self.out(&line);
                        if !self.line(line.trim_end_matches('\n')) {
                            return false;
                        }
                    }
                }
                c => self.pending.push(c),
            }
        }
        true
    }

    fn line(&mut self, line: &str) -> bool {
        if self.cat {
            self.out(&format!("{line}\n"));
            return true;
        }
        match self.execute(line) {
            Flow::Exit => false,
            Flow::Continue => {
                if !self.cat {
                    self.show_prompt();
                }
                true
            }
        }
    }

    fn execute(&mut self, line: &str) -> Flow {
        let Some(tokens) = self.tokenize(line) else {
            self.status = 2;
            return Flow::Continue;
        };

        let mut words = Vec::new();
        let mut skip = false;
        for token in tokens.into_iter().chain([Token::Op(";")]) {
            match token {
                Token::Word(word) => words.push(word),
                Token::Op(op) => {
                    if !skip && !words.is_empty() {
                        if let Flow::Exit = self.command(std::mem::take(&mut words)) {
                            return Flow::Exit;
                        }
                    }
                    words.clear();
                    skip = match op {
                        "&&" => self.status != 0,
                        "||" => self.status == 0,
                        _ => false,
                    };
                }
            }
        }
        Flow::Continue
    }

    fn command(&mut self, words: Vec<String>) -> Flow {
        let args = &words[1..];
        self.status = match words[0].as_str() {
            "echo" => {
                self.out(&format!("{}\n", args.join(" ")));
                0
            }
            "true" | ":" | "set" | "stty" | "mkdir" => 0,
            "printf" => match args.split_first() {
                Some((format, rest)) => {
                    self.out(&printf(format, rest));
                    0
                }
                None => 2,
            },
            "false" => 1,
            "test" => match args {
                [flag, s] if flag == "-n" => i32::from(s.is_empty()),
                [flag, s] if flag == "-z" => i32::from(!s.is_empty()),
                [a, op, b] if op == "=" => i32::from(a != b),
                [a, op, b] if op == "!=" => i32::from(a == b),
                _ => 2,
            },
            "export" => {
                for arg in args {
                    if let Some((name, value)) = arg.split_once('=') {
                        self.set_var(name, value);
                    }
                }
                0
            }
            "unset" => {
                if let Some(scope) = self.scopes.last_mut() {
                    for name in args {
                        scope.remove(name);
                    }
                }
                0
            }
            "exit" => {
                let code = args
                    .first()
                    .and_then(|a| a.parse().ok())
                    .unwrap_or(self.status);
                if self.scopes.len() == 1 {
                    return Flow::Exit;
                }
                self.scopes.pop();
                code
            }
            "sh" | "bash" | "ash" if args.first().map(String::as_str) == Some("-c") => {
                let script = args.get(1).cloned().unwrap_or_default();
                let depth = self.scopes.len();
                self.enter_scope();
                self.execute(&script);
                self.scopes.truncate(depth);
                self.status
            }
            "sh" | "bash" | "ash" => {
                self.enter_scope();
                0
            }
            "cat" if args.is_empty() => {
                self.cat = true;
                0
            }
            word if is_assignment(word) => {
                for assignment in &words {
                    if let Some((name, value)) = assignment.split_once('=') {
                        self.set_var(name, value);
                    }
                }
                0
            }
            other => {
                self.out(&format!("fake: {other}: command not found\n"));
                127
            }
        };
        Flow::Continue
    }

    fn enter_scope(&mut self) {
        let mut scope = self.scopes.last().cloned().unwrap_or_default();
        scope.remove("PS1");
        scope.remove("PROMPT_COMMAND");
        self.scopes.push(scope);
    }

    /// Split a line into words and operators. `None` while a quote is open.
    fn tokenize(&self, line: &str) -> Option<Vec<Token>> {
        let mut tokens = Vec::new();
        // `Some` once the current word has started, even if still empty.
        let mut word: Option<String> = None;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    let w = word.get_or_insert_with(String::new);
                    loop {
                        match chars.next()? {
                            '\'' => break,
                            ch => w.push(ch),
                        }
                    }
                }
                '"' => {
                    let w = word.get_or_insert_with(String::new);
                    loop {
                        match chars.next()? {
                            '"' => break,
                            '\\' => w.push(chars.next()?),
                            '$' => self.expand(&mut chars, w),
                            ch => w.push(ch),
                        }
                    }
                }
                '\\' => {
                    let w = word.get_or_insert_with(String::new);
                    if let Some(ch) = chars.next() {
                        w.push(ch);
                    }
                }
                '$' => self.expand(&mut chars, word.get_or_insert_with(String::new)),
                '&' | '|' | ';' => {
                    tokens.extend(word.take().map(Token::Word));
                    let op = match c {
                        '&' if chars.next_if_eq(&'&').is_some() => "&&",
                        '|' if chars.next_if_eq(&'|').is_some() => "||",
                        _ => ";",
                    };
                    tokens.push(Token::Op(op));
                }
                c if c.is_whitespace() => tokens.extend(word.take().map(Token::Word)),
                c => word.get_or_insert_with(String::new).push(c),
            }
        }
        tokens.extend(word.take().map(Token::Word));
        Some(tokens)
    }

    fn expand(&self, chars: &mut Peekable<Chars<'_>>, word: &mut String) {
        let name: String = match chars.peek() {
            Some('?') => {
                chars.next();
                word.push_str(&self.status.to_string());
                return;
            }
            Some('{') => {
                chars.next();
                chars.by_ref().take_while(|&c| c != '}').collect()
            }
            Some(c) if c.is_ascii_alphanumeric() || *c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                name
            }
            _ => {
                word.push('$');
                return;
            }
        };
        word.push_str(self.var(&name).unwrap_or_default());
    }
}

/// `printf` with `%s`, `%%` and the `\n`/`\t` escapes.
fn printf(format: &str, args: &[String]) -> String {
    let mut args = args.iter();
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        match (c, chars.clone().next()) {
            ('%', Some('s')) => {
                chars.next();
                out.push_str(args.next().map(String::as_str).unwrap_or_default());
            }
            ('%', Some('%')) => {
                chars.next();
                out.push('%');
            }
            ('\\', Some('n')) => {
                chars.next();
                out.push('\n');
            }
            ('\\', Some('t')) => {
                chars.next();
                out.push('\t');
            }
            (c, _) => out.push(c),
        }
    }
    out
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_fake_shell_echoes_and_expands() {
        let mut channel = FakeShell::spawn(ChannelConfig::default());
        channel.push_prompt(FakeShell::prompt());
        assert_ok!(channel.read_until_prompt().await);

        assert_ok!(channel.send_line_read_back("export GREETING='hello world'").await);
        assert_ok!(channel.read_until_prompt().await);
        assert_ok!(channel.send_line_read_back("echo \"${GREETING}\" $?").await);
        assert_eq!(
            assert_ok!(channel.read_until_prompt().await),
            "hello world 0\n"
        );

        assert_ok!(channel.send_line_read_back("printf '%s|%s\\n' a 'b c'").await);
        assert_eq!(assert_ok!(channel.read_until_prompt().await), "a|b c\n");
    }

    #[tokio::test]
    async fn test_fake_shell_exit_hangs_up() {
        let mut channel = FakeShell::spawn(ChannelConfig::default());
        channel.push_prompt(FakeShell::prompt());
        assert_ok!(channel.read_until_prompt().await);
        assert_ok!(channel.send_line("exit").await);
        let err = channel
            .read_until_prompt_timeout(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }
}
