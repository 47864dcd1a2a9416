//! ANSI escape sequence removal.
//!
//! The `vte` parser keeps its state between calls, so a sequence split
//! across two reads is still removed. Nothing is interpreted: cursor
//! movement, colours and titles are all simply dropped.

use vte::{Parser, Perform};

/// Streaming escape sequence remover.
pub struct AnsiStripper {
    parser: Parser,
    sink: Printable,
}

impl AnsiStripper {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            sink: Printable::default(),
        }
    }

    /// Feed raw bytes, returning the printable text they contained.
    pub fn strip(&mut self, data: &[u8]) -> Vec<u8> {
        self.parser.advance(&mut self.sink, data);
        std::mem::take(&mut self.sink.out)
    }
}

impl Default for AnsiStripper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AnsiStripper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsiStripper").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Printable {
    out: Vec<u8>,
}

impl Perform for Printable {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        // Line structure survives, other C0 controls (bell, backspace) do not.
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.out.push(byte);
        }
    }
}
