//! Turning raw child output into exchange text.

use std::fmt;
use std::sync::Arc;

use log::debug;
use regex::Regex;

use crate::channel::compile_error_pattern;

/// Text appended to the prefix when a prompt never arrives.
pub const TIMEOUT_MESSAGE: &str = "Execution timed out.";

/// Text appended to the prefix when the child's output ends.
pub const EXIT_MARKER: &str = " [exit]";

/// Decodes one line of child output.
///
/// The bridge treats encoding repair as someone else's problem. Plug in a
/// smarter decoder here if a child emits something other than UTF-8.
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, line: &[u8]) -> String;
}

/// Lossy UTF-8 decoding; invalid sequences become U+FFFD.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Lossy;

impl TextNormalizer for Utf8Lossy {
    fn normalize(&self, line: &[u8]) -> String {
        String::from_utf8_lossy(line).into_owned()
    }
}

/// Shaped exchange text and whether it matched an error pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedOutput {
    pub text: String,
    pub is_error: bool,
}

/// Applies the per-session output policy: prefixing, echo stripping and
/// error classification.
#[derive(Clone)]
pub struct OutputShaper {
    prefix: String,
    errors: Vec<Regex>,
    strip_echo: bool,
    normalizer: Arc<dyn TextNormalizer>,
}

impl fmt::Debug for OutputShaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputShaper")
            .field("prefix", &self.prefix)
            .field("errors", &self.errors)
            .field("strip_echo", &self.strip_echo)
            .finish_non_exhaustive()
    }
}

impl OutputShaper {
    /// Compile error patterns behind `prefix`.
    pub fn compile<S: AsRef<str>>(
        prefix: impl Into<String>,
        error_patterns: &[S],
        strip_echo: bool,
    ) -> Result<Self, regex::Error> {
        let prefix = prefix.into();
        let errors = error_patterns
            .iter()
            .map(|p| compile_error_pattern(&prefix, p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            prefix,
            errors,
            strip_echo,
            normalizer: Arc::new(Utf8Lossy),
        })
    }

    /// Replace the line decoder.
    pub fn with_normalizer(mut self, normalizer: Arc<dyn TextNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn strip_echo(&self) -> bool {
        self.strip_echo
    }

    /// Text reported when the deadline passes.
    pub fn timeout_text(&self) -> String {
        format!("{}{}\n", self.prefix, TIMEOUT_MESSAGE)
    }

    /// Shape the output that preceded a prompt (or end-of-file).
    pub fn shape(&self, input: &str, before: &[u8], eof: bool) -> ShapedOutput {
        let mut lines: Vec<String> = split_lines(before)
            .map(|line| self.normalizer.normalize(line))
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("{}{}", self.prefix, line))
            .collect();

        if self.strip_echo && !input.trim().is_empty() && !lines.is_empty() {
            let echo = lines.remove(0);
            debug!("stripped echo line {:?}", echo);
        }
        if eof {
            lines.push(format!("{}{}", self.prefix, EXIT_MARKER));
        }

        let mut text = lines.join("\n");
        let is_error = self.is_error(&text);
        if !text.is_empty() {
            text.push('\n');
        }
        ShapedOutput { text, is_error }
    }

    /// Whether `text` matches any error pattern.
    pub fn is_error(&self, text: &str) -> bool {
        match self.errors.iter().find(|re| re.is_match(text)) {
            Some(re) => {
                debug!("output matched error pattern {}", re.as_str());
                true
            }
            None => false,
        }
    }
}

/// Split on `\n`, dropping one trailing `\r` per line.
fn split_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let chunk = rest?;
        let line = match memchr::memchr(b'\n', chunk) {
            Some(pos) => {
                rest = Some(&chunk[pos + 1..]);
                &chunk[..pos]
            }
            None => {
                rest = None;
                chunk
            }
        };
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    })
}
