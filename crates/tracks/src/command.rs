//! External tool invocations as data.
//!
//! A [`ToolCommand`] is an argv vector; it is executed directly, without a
//! shell, but can be rendered as a copy-pasteable shell line for the user.

use std::borrow::Cow;

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToolCommand {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
}

impl ToolCommand {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render as a shell command line.
    pub(crate) fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(render_word)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote a single word. `KEY=VALUE` assignments keep the key bare and only
/// quote the value, so `COMPILER=LLVM=1` reads as `COMPILER='LLVM=1'`.
fn render_word(word: &str) -> Cow<'_, str> {
    if let Some((key, value)) = word.split_once('=') {
        if is_identifier(key) {
            return Cow::Owned(format!("{key}={}", quote(value)));
        }
    }
    quote(word)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote(s: &str) -> Cow<'_, str> {
    if !s.is_empty() && s.bytes().all(is_plain) {
        return Cow::Borrowed(s);
    }
    // Only NUL bytes make quoting fail, and those cannot appear in argv anyway
    shlex::try_quote(s).unwrap_or_else(|_| Cow::Owned(format!("{s:?}")))
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.' | b'/' | b':' | b'@' | b'_' | b',')
}
