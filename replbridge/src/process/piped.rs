//! A child process with piped standard streams.

use std::io;
#[cfg(unix)]
use std::io::Write;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use log::{debug, warn};
use wait_timeout::ChildExt;

#[cfg(unix)]
use crate::channel::{NonBlocking, PollingReader};
use crate::channel::{NonBlockingReader, QueueReader, QueueWriter, ReadOutcome};
use crate::error::CloseError;

use super::ChildProcess;

/// How long `release` waits for I/O threads to finish.
const IO_JOIN_GRACE: Duration = Duration::from_secs(1);

/// Output side of a [`PipedChild`].
#[derive(Debug)]
pub(crate) enum ReaderBackend {
    #[cfg(unix)]
    Polling(PollingReader),
    Queue(QueueReader),
}

impl ReaderBackend {
    fn read_available(&mut self, deadline: Option<Instant>) -> ReadOutcome {
        match self {
            #[cfg(unix)]
            ReaderBackend::Polling(reader) => reader.read_available(deadline),
            ReaderBackend::Queue(reader) => reader.read_available(deadline),
        }
    }

    /// Close the read ends. Returns the number of reader threads left running.
    fn close(&mut self) -> usize {
        match self {
            #[cfg(unix)]
            ReaderBackend::Polling(reader) => {
                reader.close();
                0
            }
            ReaderBackend::Queue(reader) => reader.close(IO_JOIN_GRACE),
        }
    }
}

/// Input side of a [`PipedChild`].
#[derive(Debug)]
pub(crate) enum StdinPipe {
    #[cfg(unix)]
    NonBlocking(NonBlocking),
    Queue(QueueWriter),
}

impl StdinPipe {
    fn write_available(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            StdinPipe::NonBlocking(pipe) => loop {
                match pipe.write(data) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                    Err(e) => return Err(e),
                }
            },
            StdinPipe::Queue(writer) => writer.write_available(data),
        }
    }

    /// Close the write end. Returns `false` while a writer thread is blocked.
    fn close(&mut self) -> bool {
        match self {
            #[cfg(unix)]
            StdinPipe::NonBlocking(_) => true,
            StdinPipe::Queue(writer) => writer.close(IO_JOIN_GRACE),
        }
    }
}

/// A spawned child whose stdin, stdout and stderr are pipes we own.
///
/// Built by [`CommandSpawner`](super::CommandSpawner). The output reader is
/// attached before the value exists, so no output can be missed.
#[derive(Debug)]
pub struct PipedChild {
    command: String,
    child: Child,
    pid: u32,
    stdin: Option<StdinPipe>,
    reader: ReaderBackend,
    status: Option<ExitStatus>,
    released: bool,
}

impl PipedChild {
    pub(crate) fn new(
        command: String,
        child: Child,
        reader: ReaderBackend,
        stdin: StdinPipe,
    ) -> Self {
        let pid = child.id();
        Self {
            command,
            child,
            pid,
            stdin: Some(stdin),
            reader,
            status: None,
            released: false,
        }
    }

    /// The command line this child was started from.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Exit status, once observed.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    fn record(&mut self, status: Option<ExitStatus>) -> Option<ExitStatus> {
        if let Some(status) = status {
            if self.status.is_none() {
                debug!("process {} exited with {}", self.pid, status);
            }
            self.status = Some(status);
        }
        status
    }
}

impl NonBlockingReader for PipedChild {
    fn read_available(&mut self, deadline: Option<Instant>) -> ReadOutcome {
        self.reader.read_available(deadline)
    }
}

impl ChildProcess for PipedChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn write_available(&mut self, data: &[u8]) -> io::Result<usize> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stdin already closed"))?;
        stdin.write_available(data)
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already gone (reaped elsewhere or exited between checks).
            Err(e) => match self.try_wait() {
                Ok(Some(_)) => Ok(()),
                _ => Err(e),
            },
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        let status = self.child.try_wait()?;
        Ok(self.record(status))
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        let status = self.child.wait_timeout(timeout)?;
        Ok(self.record(status))
    }

    fn release(&mut self) -> Result<(), CloseError> {
        if self.released {
            return Ok(());
        }
        let mut pending = self.reader.close();
        if let Some(stdin) = self.stdin.as_mut() {
            if stdin.close() {
                self.stdin = None;
            } else {
                pending += 1;
            }
        }
        if pending > 0 {
            return Err(CloseError::ReaderThreads {
                pid: self.pid,
                pending,
            });
        }
        self.released = true;
        debug!("released pipes of process {}", self.pid);
        Ok(())
    }
}

impl Drop for PipedChild {
    fn drop(&mut self) {
        if self.status.is_none() && matches!(self.child.try_wait(), Ok(None)) {
            warn!("process {} dropped while running, killing it", self.pid);
            let _ = self.child.kill();
            let _ = self.child.wait_timeout(Duration::from_millis(500));
        }
        if !self.released {
            if let Some(stdin) = self.stdin.as_mut() {
                stdin.close();
            }
            self.stdin = None;
            self.reader.close();
        }
    }
}
