//! Child process creation and control.
//!
//! The session never talks to `std::process::Child` directly. It talks to a
//! [`ChildProcess`], which bundles the output reader with the handful of
//! process operations a REPL bridge needs. [`PipedChild`] is the real
//! implementation; tests inject scripted ones.

mod command_line;
mod piped;
mod spawner;

pub use command_line::{split_command_line, split_posix, split_windows};
pub use piped::PipedChild;
pub use spawner::{CommandSpawner, SpawnRequest};

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use crate::channel::NonBlockingReader;
use crate::error::CloseError;

/// Capabilities of a running child process.
///
/// Reads go through the [`NonBlockingReader`] supertrait and cover stdout
/// and stderr together. Neither reads nor writes wait past a deadline. After
/// a successful [`release`](Self::release) every read and write fails.
pub trait ChildProcess: NonBlockingReader {
    /// OS process id.
    fn id(&self) -> u32;

    /// Write as much of `data` to the child's stdin as it takes right now.
    ///
    /// Returns the number of bytes accepted, `0` while the pipe is full.
    /// Never blocks. A child that closed its stdin gives `BrokenPipe`.
    fn write_available(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Ask the OS to kill the child. Succeeds if it has already exited.
    fn terminate(&mut self) -> io::Result<()>;

    /// Exit status if the child has exited, without blocking.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Wait up to `timeout` for the child to exit.
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>>;

    /// Whether the child is still running.
    fn is_alive(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Close the pipes and stop the I/O threads. Call after the child exited.
    ///
    /// Can be retried after `CloseError::ReaderThreads`.
    fn release(&mut self) -> Result<(), CloseError>;
}
