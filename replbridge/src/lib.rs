//! # replbridge
//!
//! Drive interactive command-line programs (shells, language interpreters)
//! as child processes, one exchange at a time.
//!
//! replbridge spawns the child with piped standard streams, sends it input
//! and waits for one of its prompts, much like `expect`. The output that
//! came before the prompt is prefixed line by line, classified against error
//! patterns and returned as an [`ExchangeResult`]. Timeouts and the child
//! exiting are flags on that result, so a session survives them.
//!
//! ## Features
//!
//! - Deadline-bounded reads: non-blocking pipes on Unix, reader threads and
//!   a bounded queue elsewhere
//! - Ordered prompt patterns with end-of-file and timeout sentinels
//! - Efficient tail search over the output buffer
//! - Optional ANSI escape stripping
//! - Bounded, retrying shutdown
//! - Background exchanges with [`ReplThread`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use replbridge::{HostContext, ReplBuilder};
//!
//! fn main() -> Result<(), replbridge::Error> {
//!     let host = HostContext::capture(".");
//!     let mut repl = ReplBuilder::new("python3 -i -u")
//!         .prompt(">>> ")
//!         .prompt(r"\.\.\. ")
//!         .prefix("# ")
//!         .error("Traceback")
//!         .start(&host)?;
//!
//!     let result = repl.correspond("sum(range(10))\n")?;
//!     print!("{}", result);
//!
//!     repl.close()?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod process;
pub mod repl;

// Re-export main types for convenience
pub use config::{CommandLine, HostContext, ReaderMode, ReplConfig, StderrMode};
pub use error::{Error, Result};
pub use process::{ChildProcess, CommandSpawner, PipedChild, SpawnRequest};
pub use repl::{
    ExchangeResult, Repl, ReplBuilder, ReplSettings, ReplState, ReplThread, TextNormalizer,
};
