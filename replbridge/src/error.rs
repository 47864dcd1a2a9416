//! Error types for replbridge.
//!
//! Only setup and teardown failures are errors. Timeouts, end-of-file and
//! output matching an error pattern are reported inside
//! [`ExchangeResult`](crate::ExchangeResult) instead.

use std::io;
use thiserror::Error;

use crate::repl::ReplState;

/// Main error type for replbridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The REPL could not be started.
    #[error("REPL start error: {0}")]
    Start(#[from] StartError),

    /// The REPL could not be shut down.
    #[error("REPL close error: {0}")]
    Close(#[from] CloseError),

    /// Reading from or writing to the child failed.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The session was used in a state that does not allow the operation.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Failures while starting a REPL session.
#[derive(Error, Debug)]
pub enum StartError {
    /// The executable could not be found on the search path.
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },

    /// The command line could not be split into program and arguments.
    #[error("Invalid command line '{command}': {message}")]
    InvalidCommand { command: String, message: String },

    /// The configuration is unusable.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A prompt, error or ignore pattern failed to compile.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The OS refused to create the process.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The child never showed its first prompt.
    #[error("No prompt from child: {reason}")]
    NoPrompt { reason: String, output: String },
}

/// Failures while shutting down a REPL session.
#[derive(Error, Debug)]
pub enum CloseError {
    /// The child was still alive after every termination attempt.
    #[error("Process {pid} still running after {attempts} termination attempts: {detail}")]
    RetriesExhausted {
        pid: u32,
        attempts: u32,
        detail: String,
    },

    /// Reader threads or the stdin writer did not finish after the child
    /// was reaped. Closing again waits for them once more.
    #[error("{pending} I/O thread(s) of process {pid} did not terminate")]
    ReaderThreads { pid: u32, pending: usize },
}

/// Channel layer errors (reading and writing the child's streams).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// I/O error on one of the child's streams.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Session misuse.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session is not ready for an exchange.
    #[error("Session is {state:?}, not ready for input")]
    NotReady { state: ReplState },

    /// The worker thread running an exchange panicked.
    #[error("Worker thread panicked during correspondence")]
    WorkerPanicked,

    /// The worker thread could not be started.
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),
}

/// Result type alias using replbridge's Error.
pub type Result<T> = std::result::Result<T, Error>;
