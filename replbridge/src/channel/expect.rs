//! Expect loop: read until one of a set of patterns matches.

use std::io;
use std::time::Instant;

use log::{debug, trace};

use super::buffer::OutputBuffer;
use super::patterns::{EOF_INDEX, PromptPatternSet, TIMEOUT_INDEX};
use super::reader::{NonBlockingReader, ReadOutcome};

/// How an expect call ended.
#[derive(Debug)]
pub enum ExpectOutcome {
    /// A prompt pattern matched.
    Matched {
        /// Index into the pattern set (always past the sentinels).
        index: usize,
        /// Output preceding the match.
        before: Vec<u8>,
        /// The matched bytes.
        matched: Vec<u8>,
    },

    /// The deadline passed. Buffered output is kept for the next call.
    TimedOut,

    /// The child's output ended. `before` holds everything left unmatched.
    EndOfFile { before: Vec<u8> },

    /// Reading failed.
    IoError(io::Error),
}

impl ExpectOutcome {
    /// Index in the pattern set, with the sentinels for EOF and timeout.
    pub fn index(&self) -> Option<usize> {
        match self {
            ExpectOutcome::Matched { index, .. } => Some(*index),
            ExpectOutcome::TimedOut => Some(TIMEOUT_INDEX),
            ExpectOutcome::EndOfFile { .. } => Some(EOF_INDEX),
            ExpectOutcome::IoError(_) => None,
        }
    }
}

/// Owns the output buffer between expect calls.
#[derive(Debug, Default)]
pub struct ExpectEngine {
    buffer: OutputBuffer,
}

impl ExpectEngine {
    pub fn new(buffer: OutputBuffer) -> Self {
        Self { buffer }
    }

    /// Output read but not yet consumed by a match.
    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    /// Buffer output read outside of [`expect`](Self::expect).
    pub fn feed(&mut self, data: &[u8]) {
        trace!("fed {} bytes", data.len());
        self.buffer.extend(data);
    }

    /// Read from `reader` until a pattern in `patterns` matches.
    ///
    /// Output left over from the previous call is tested before anything is
    /// read. Patterns are tried in order after every read.
    pub fn expect<R>(
        &mut self,
        reader: &mut R,
        patterns: &PromptPatternSet,
        deadline: Option<Instant>,
    ) -> ExpectOutcome
    where
        R: NonBlockingReader + ?Sized,
    {
        loop {
            if let Some((index, range)) = patterns.first_match(&self.buffer) {
                let (before, matched) = self.buffer.consume_match(range);
                debug!(
                    "pattern {} matched {:?} after {} bytes",
                    index,
                    String::from_utf8_lossy(&matched),
                    before.len()
                );
                return ExpectOutcome::Matched {
                    index,
                    before,
                    matched,
                };
            }
            self.buffer.mark_searched();

            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!("expect timed out with {} bytes buffered", self.buffer.len());
                return ExpectOutcome::TimedOut;
            }

            match reader.read_available(deadline) {
                ReadOutcome::Data(data) => {
                    trace!("expect: +{} bytes", data.len());
                    self.buffer.extend(&data);
                }
                ReadOutcome::TimedOut => {
                    debug!("expect timed out with {} bytes buffered", self.buffer.len());
                    return ExpectOutcome::TimedOut;
                }
                ReadOutcome::Eof => {
                    debug!("expect reached end-of-file");
                    return ExpectOutcome::EndOfFile {
                        before: self.buffer.take(),
                    };
                }
                ReadOutcome::Error(e) => return ExpectOutcome::IoError(e),
            }
        }
    }
}
