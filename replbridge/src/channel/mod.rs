//! Channel layer: non-blocking reads and pattern matching.
//!
//! This module handles everything between the child's raw output pipes and
//! a classified expect outcome: deadline-bounded readers for both process
//! models, the stdin writer thread, the output buffer and the ordered prompt
//! patterns.

mod ansi;
mod buffer;
mod expect;
mod patterns;
mod queue;
mod reader;
mod writer;

pub use ansi::AnsiStripper;
pub use buffer::OutputBuffer;
pub use expect::{ExpectEngine, ExpectOutcome};
pub use patterns::{
    EOF_INDEX, Pattern, PromptPatternSet, TIMEOUT_INDEX, compile_error_pattern,
    compile_prompt_pattern,
};
pub use queue::{QueueReader, ReaderEvent, ReaderMessage, spawn_reader_thread};
#[cfg(unix)]
pub use reader::{NonBlocking, PollingReader};
pub use reader::{NonBlockingReader, ReadOutcome, StreamId};
pub use writer::QueueWriter;
