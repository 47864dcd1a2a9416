//! Result type for one exchange with the child.

use std::fmt;
use std::time::Duration;

/// Outcome of one [`correspond`](super::Repl::correspond) call.
///
/// Timeouts, end-of-file and error-pattern matches are flags on the result,
/// not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeResult {
    input: String,
    text: String,
    is_timeout: bool,
    is_eof: bool,
    is_error: bool,
    elapsed: Duration,
}

impl ExchangeResult {
    /// A successful exchange.
    pub fn new(
        input: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
        elapsed: Duration,
    ) -> Self {
        Self {
            input: input.into(),
            text: text.into(),
            is_error,
            elapsed,
            ..Self::default()
        }
    }

    /// The child produced no prompt before the deadline.
    pub fn timed_out(input: impl Into<String>, text: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            input: input.into(),
            text: text.into(),
            is_timeout: true,
            elapsed,
            ..Self::default()
        }
    }

    /// The child's output ended.
    pub fn end_of_file(
        input: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
        elapsed: Duration,
    ) -> Self {
        Self {
            input: input.into(),
            text: text.into(),
            is_eof: true,
            is_error,
            elapsed,
            ..Self::default()
        }
    }

    /// The input matched an ignore pattern and was not sent.
    pub fn empty(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    /// The input as submitted.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Shaped output, prefixed and newline-terminated.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_timeout(&self) -> bool {
        self.is_timeout
    }

    pub fn is_eof(&self) -> bool {
        self.is_eof
    }

    /// Output matched one of the session's error patterns.
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Time spent waiting for the child.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether a caller driving a sequence of inputs should stop here.
    pub fn terminates(&self) -> bool {
        self.is_timeout || self.is_eof || self.is_error
    }

    /// Get the text lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }

    /// Check if the text contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.text.contains(pattern)
    }
}

impl fmt::Display for ExchangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
