//! Argument quoting and command-line splitting
//!
//! Process creation on loaders that take a single flat command line (rather
//! than an argv vector) requires the launcher to quote every argument so the
//! child's C runtime splits it back into the original vector.
//!
//! Splitting rules reproduced by [`split_command_line`]:
//!
//! - whitespace (space, tab) outside quotes separates arguments
//! - `"` toggles quoted mode; inside quotes `""` is a literal quote
//! - `2n` backslashes before a quote give `n` backslashes and the quote
//!   delimits; `2n+1` backslashes give `n` backslashes and a literal quote
//! - backslashes not followed by a quote are literal
//!
//! [`quote_args`] is the inverse for the [`QuoteDialect::Simple`] dialect.
//! The [`QuoteDialect::Shell`] dialect targets POSIX-style shells, whose
//! startup code treats `""` inside quotes as a literal quote and does not
//! give backslashes special meaning before it.

use core::fmt;

/// How embedded double quotes are escaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteDialect {
    /// `\"`, with preceding backslashes doubled
    #[default]
    Simple,
    /// `""`, backslashes left alone
    Shell,
}

/// A flat, quoted command line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    line: String,
}

impl CommandLine {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// The command line as the loader expects it, NUL-terminated
    pub fn to_bytes_with_nul(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.line.len() + 1);
        bytes.extend_from_slice(self.line.as_bytes());
        bytes.push(0);
        bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.line.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl AsRef<str> for CommandLine {
    fn as_ref(&self) -> &str {
        &self.line
    }
}

/// Does `arg` have to be enclosed in quotes?
fn needs_quotes(arg: &str) -> bool {
    arg.is_empty()
        || arg.bytes().any(|b| matches!(b, b' ' | b'\t' | b'"'))
        || arg.ends_with('\\')
}

#[inline]
fn push_backslashes(out: &mut String, n: usize) {
    out.extend(core::iter::repeat('\\').take(n));
}

/// Append one argument to `out`, quoted as needed
pub fn quote_arg(arg: &str, dialect: QuoteDialect, out: &mut String) {
    if !needs_quotes(arg) {
        out.push_str(arg);
        return;
    }

    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                match dialect {
                    QuoteDialect::Simple => {
                        push_backslashes(out, backslashes * 2 + 1);
                        out.push('"');
                    }
                    QuoteDialect::Shell => {
                        push_backslashes(out, backslashes);
                        out.push_str("\"\"");
                    }
                }
                backslashes = 0;
            }
            _ => {
                push_backslashes(out, backslashes);
                out.push(c);
                backslashes = 0;
            }
        }
    }
    // Trailing backslashes sit right before the closing quote
    push_backslashes(out, backslashes * 2);
    out.push('"');
}

/// Join `args` into one command line, single-space separated, in order
pub fn quote_args<S: AsRef<str>>(args: &[S], dialect: QuoteDialect) -> CommandLine {
    let hint: usize = args.iter().map(|a| a.as_ref().len() + 3).sum();
    let mut line = String::with_capacity(hint);
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        quote_arg(arg.as_ref(), dialect, &mut line);
    }
    CommandLine { line }
}

/// Split a command line into arguments the way the child's runtime does
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(' ' | '\t')) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut cur = String::new();
        let mut in_quotes = false;
        while let Some(&c) = chars.peek() {
            match c {
                ' ' | '\t' if !in_quotes => break,
                '\\' => {
                    let mut n = 0usize;
                    while chars.peek() == Some(&'\\') {
                        chars.next();
                        n += 1;
                    }
                    if chars.peek() == Some(&'"') {
                        push_backslashes(&mut cur, n / 2);
                        if n % 2 == 1 {
                            chars.next();
                            cur.push('"');
                        }
                    } else {
                        push_backslashes(&mut cur, n);
                    }
                }
                '"' => {
                    chars.next();
                    if in_quotes && chars.peek() == Some(&'"') {
                        chars.next();
                        cur.push('"');
                    } else {
                        in_quotes = !in_quotes;
                    }
                }
                _ => {
                    chars.next();
                    cur.push(c);
                }
            }
        }
        args.push(cur);
    }
    args
}
