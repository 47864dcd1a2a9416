//! Output buffer with incremental tail search.
//!
//! Every read appends to the buffer and the prompt patterns are tested again.
//! Re-scanning the whole buffer each time is quadratic for large outputs, so
//! a search only starts `search_depth` bytes before the end of the region
//! that was already searched without a match.

use std::ops::Range;

use bytes::BytesMut;
use regex::bytes::Regex;

use super::ansi::AnsiStripper;

/// Bytes read from the child since the last successful match.
#[derive(Debug)]
pub struct OutputBuffer {
    /// The accumulated output.
    buffer: BytesMut,

    /// How many already-searched bytes are searched again.
    search_depth: usize,

    /// Length of the prefix that was searched without a match.
    searched: usize,

    /// Escape sequence remover, when enabled.
    stripper: Option<AnsiStripper>,
}

impl OutputBuffer {
    /// Create a new buffer with the specified search depth.
    ///
    /// # Arguments
    ///
    /// * `search_depth` - Bytes of previously searched output that are
    ///   searched again on each call. Must exceed the longest match.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            search_depth,
            searched: 0,
            stripper: None,
        }
    }

    /// Remove ANSI escape sequences from everything appended from now on.
    pub fn with_ansi_stripping(mut self) -> Self {
        self.stripper = Some(AnsiStripper::new());
        self
    }

    /// Append data read from the child.
    pub fn extend(&mut self, data: &[u8]) {
        match self.stripper.as_mut() {
            Some(stripper) => {
                let cleaned = stripper.strip(data);
                self.buffer.extend_from_slice(&cleaned);
            }
            None => self.buffer.extend_from_slice(data),
        }
    }

    /// Find `pattern` in the unsearched tail.
    ///
    /// Returns the match range in full-buffer offsets. Positions before the
    /// search start still count as context for anchors.
    pub fn search_tail(&self, pattern: &Regex) -> Option<Range<usize>> {
        let start = self.searched.saturating_sub(self.search_depth);
        pattern.find_at(&self.buffer, start).map(|m| m.range())
    }

    /// Search the entire buffer for a pattern.
    pub fn search_full(&self, pattern: &Regex) -> Option<Range<usize>> {
        pattern.find(&self.buffer).map(|m| m.range())
    }

    /// Record that the current contents were searched without a match.
    pub fn mark_searched(&mut self) {
        self.searched = self.buffer.len();
    }

    /// Remove everything up to `range.end`, returning the bytes before
    /// `range.start` and the matched bytes. Later bytes stay buffered.
    pub fn consume_match(&mut self, range: Range<usize>) -> (Vec<u8>, Vec<u8>) {
        let mut head = self.buffer.split_to(range.end);
        let matched = head.split_off(range.start);
        self.searched = 0;
        (head.to_vec(), matched.to_vec())
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        self.searched = 0;
        self.buffer.split().to_vec()
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the search depth setting.
    pub fn search_depth(&self) -> usize {
        self.search_depth
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}
