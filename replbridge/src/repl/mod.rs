//! High-level session API.
//!
//! A [`Repl`] owns one child process and drives it one exchange at a time:
//! send input, wait for the next prompt, and shape what came before it into
//! an [`ExchangeResult`]. [`ReplThread`] runs one exchange on a worker
//! thread so the caller can poll instead of block.

mod builder;
mod output;
mod result;
mod session;
#[cfg(test)]
pub(crate) mod testing;
mod thread;

pub use builder::ReplBuilder;
pub use output::{
    EXIT_MARKER, OutputShaper, ShapedOutput, TIMEOUT_MESSAGE, TextNormalizer, Utf8Lossy,
};
pub use result::ExchangeResult;
pub use session::{Repl, ReplSettings, ReplState};
pub use thread::ReplThread;
