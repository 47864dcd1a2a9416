//! Deadline-bounded reads from the child's output streams.

use std::fmt;
use std::io;
use std::time::Instant;

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Stdout => f.write_str("stdout"),
            StreamId::Stderr => f.write_str("stderr"),
        }
    }
}

/// Result of one bounded read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Bytes from one of the streams.
    Data(Vec<u8>),

    /// Nothing arrived before the deadline.
    TimedOut,

    /// Every stream has reached end-of-file.
    Eof,

    /// A stream failed. The reader stays failed.
    Error(io::Error),
}

/// Source of child output that never blocks past a deadline.
pub trait NonBlockingReader: Send {
    /// Wait for output until `deadline`, or forever when it is `None`.
    fn read_available(&mut self, deadline: Option<Instant>) -> ReadOutcome;
}

/// Sticky terminal state shared by the reader implementations.
#[derive(Debug, Default)]
pub(crate) enum Exhaustion {
    #[default]
    Live,
    Eof,
    Failed(io::ErrorKind, String),
}

impl Exhaustion {
    /// The outcome to repeat once the reader is terminal.
    pub(crate) fn outcome(&self) -> Option<ReadOutcome> {
        match self {
            Exhaustion::Live => None,
            Exhaustion::Eof => Some(ReadOutcome::Eof),
            Exhaustion::Failed(kind, message) => {
                Some(ReadOutcome::Error(io::Error::new(*kind, message.clone())))
            }
        }
    }

    /// Record a stream failure and return the outcome for it.
    pub(crate) fn fail(&mut self, stream: StreamId, error: &io::Error) -> ReadOutcome {
        *self = Exhaustion::Failed(error.kind(), format!("{stream}: {error}"));
        self.outcome().unwrap_or(ReadOutcome::Eof)
    }
}

#[cfg(unix)]
pub use self::polling::{NonBlocking, PollingReader};

#[cfg(unix)]
mod polling {
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::thread;
    use std::time::{Duration, Instant};

    use log::{debug, trace};

    use super::{Exhaustion, NonBlockingReader, ReadOutcome, StreamId};

    /// A pipe end that is guaranteed to be in non-blocking mode.
    ///
    /// The only way to build one sets `O_NONBLOCK` first, so a blocking
    /// descriptor can never reach [`PollingReader`] or a stdin write.
    #[derive(Debug)]
    pub struct NonBlocking {
        file: File,
    }

    impl NonBlocking {
        pub fn new(fd: impl Into<OwnedFd>) -> io::Result<Self> {
            let fd: OwnedFd = fd.into();
            set_nonblocking(fd.as_raw_fd())?;
            Ok(Self {
                file: File::from(fd),
            })
        }
    }

    impl Read for NonBlocking {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.file.read(buf)
        }
    }

    impl Write for NonBlocking {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.file.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn set_nonblocking(fd: std::os::fd::RawFd) -> io::Result<()> {
        // SAFETY: fd is owned by the caller and open for the duration of the call.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: as above; only the status flags of this descriptor change.
        let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[derive(Debug)]
    struct PolledStream {
        id: StreamId,
        source: NonBlocking,
        exhausted: bool,
    }

    /// Polls non-blocking descriptors, sleeping briefly between attempts.
    #[derive(Debug)]
    pub struct PollingReader {
        streams: Vec<PolledStream>,
        poll_interval: Duration,
        chunk: Vec<u8>,
        state: Exhaustion,
        /// Stream polled first on the next pass.
        next: usize,
    }

    impl PollingReader {
        pub fn new(poll_interval: Duration, chunk_size: usize) -> Self {
            Self {
                streams: Vec::with_capacity(2),
                poll_interval,
                chunk: vec![0u8; chunk_size.max(1)],
                state: Exhaustion::Live,
                next: 0,
            }
        }

        /// Attach a stream.
        ///
        /// The first stream polled moves on after every chunk, so a busy
        /// stream cannot hold back the others.
        pub fn attach(&mut self, id: StreamId, source: NonBlocking) {
            self.streams.push(PolledStream {
                id,
                source,
                exhausted: false,
            });
        }

        /// Close every descriptor. Later reads fail.
        pub fn close(&mut self) {
            self.streams.clear();
            self.state = Exhaustion::Failed(
                io::ErrorKind::NotConnected,
                "output streams closed".to_string(),
            );
        }

        /// One pass over the live streams without sleeping.
        fn poll_once(&mut self) -> Option<ReadOutcome> {
            let count = self.streams.len();
            for offset in 0..count {
                let index = (self.next + offset) % count;
                let stream = &mut self.streams[index];
                if stream.exhausted {
                    continue;
                }
                loop {
                    match stream.source.read(&mut self.chunk) {
                        Ok(0) => {
                            debug!("{} reached end-of-file", stream.id);
                            stream.exhausted = true;
                        }
                        Ok(n) => {
                            trace!("read {} bytes from {}", n, stream.id);
                            self.next = (index + 1) % count;
                            return Some(ReadOutcome::Data(self.chunk[..n].to_vec()));
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => return Some(self.state.fail(stream.id, &e)),
                    }
                    break;
                }
            }

            if self.streams.iter().all(|s| s.exhausted) {
                self.state = Exhaustion::Eof;
                return Some(ReadOutcome::Eof);
            }
            None
        }
    }

    impl NonBlockingReader for PollingReader {
        fn read_available(&mut self, deadline: Option<Instant>) -> ReadOutcome {
            loop {
                if let Some(outcome) = self.state.outcome() {
                    return outcome;
                }
                if let Some(outcome) = self.poll_once() {
                    return outcome;
                }

                let pause = match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return ReadOutcome::TimedOut;
                        }
                        remaining.min(self.poll_interval)
                    }
                    None => self.poll_interval,
                };
                thread::sleep(pause);
            }
        }
    }

}
