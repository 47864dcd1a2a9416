//! Pattern sets for prompt detection.
//!
//! A pattern set always starts with two sentinels, end-of-file at index 0
//! and timeout at index 1, so the index returned by an expect call says by
//! itself how the exchange ended.

use std::ops::Range;

use regex::bytes::Regex;

use super::buffer::OutputBuffer;

/// Index of the end-of-file sentinel.
pub const EOF_INDEX: usize = 0;

/// Index of the timeout sentinel.
pub const TIMEOUT_INDEX: usize = 1;

/// One alternative of a pattern set.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches when the child's output reaches end-of-file.
    Eof,

    /// Matches when the deadline passes.
    Timeout,

    /// Matches the child's output.
    Regex(Regex),
}

impl Pattern {
    /// Whether this is one of the reserved sentinels.
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Pattern::Regex(_))
    }
}

/// Ordered alternatives: `[Eof, Timeout, prompt...]`.
#[derive(Debug, Clone)]
pub struct PromptPatternSet {
    patterns: Vec<Pattern>,
}

impl PromptPatternSet {
    /// Build a set from already compiled prompt regexes, used verbatim.
    pub fn new(prompts: impl IntoIterator<Item = Regex>) -> Self {
        let mut patterns = vec![Pattern::Eof, Pattern::Timeout];
        patterns.extend(prompts.into_iter().map(Pattern::Regex));
        Self { patterns }
    }

    /// Compile prompt strings with [`compile_prompt_pattern`].
    pub fn compile<S: AsRef<str>>(prompts: &[S]) -> Result<Self, regex::Error> {
        let compiled = prompts
            .iter()
            .map(|p| compile_prompt_pattern(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(compiled))
    }

    /// Number of alternatives, sentinels included.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set has no prompt patterns besides the sentinels.
    pub fn is_empty(&self) -> bool {
        self.patterns.len() <= TIMEOUT_INDEX + 1
    }

    /// Get an alternative by index.
    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    /// Test the buffer against each prompt in order.
    ///
    /// The first pattern that matches anywhere wins, even if a later pattern
    /// matches earlier in the text. Returns the pattern index and the match
    /// range in buffer offsets.
    pub fn first_match(&self, buffer: &OutputBuffer) -> Option<(usize, Range<usize>)> {
        self.patterns
            .iter()
            .enumerate()
            .find_map(|(index, pattern)| match pattern {
                Pattern::Regex(regex) => buffer.search_tail(regex).map(|range| (index, range)),
                Pattern::Eof | Pattern::Timeout => None,
            })
    }
}

/// Compile a prompt pattern string into a regex.
///
/// Anchors to the end of the output (allowing trailing whitespace) unless
/// the pattern already ends with an unescaped `$`.
pub fn compile_prompt_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    if is_end_anchored(pattern) {
        Regex::new(pattern)
    } else {
        Regex::new(&format!("(?:{pattern})\\s*$"))
    }
}

/// Compile an error pattern so it only matches at the start of a line,
/// right after the output prefix.
pub fn compile_error_pattern(prefix: &str, pattern: &str) -> Result<regex::Regex, regex::Error> {
    regex::Regex::new(&format!("(?m)^{}(?:{pattern})", regex::escape(prefix)))
}

fn is_end_anchored(pattern: &str) -> bool {
    let Some(body) = pattern.strip_suffix('$') else {
        return false;
    };
    let escapes = body.bytes().rev().take_while(|&b| b == b'\\').count();
    escapes % 2 == 0
}
