//! Scripted in-memory child for session tests.

use std::collections::VecDeque;
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::channel::{NonBlockingReader, ReadOutcome};
use crate::error::CloseError;
use crate::process::ChildProcess;

/// What the scripted child does in answer to one write.
pub(crate) enum Reply {
    /// Emit output and keep running.
    Output(&'static str),
    /// Emit output, then exit.
    Exit(&'static str),
    /// Emit nothing.
    Silent,
}

/// Observable state of a [`ScriptedChild`], shared with the test.
#[derive(Debug, Default)]
pub(crate) struct Spy {
    pub writes: Vec<String>,
    pub terminations: u32,
    pub released: bool,
    pub exited: bool,
}

/// Answers each write with the next scripted reply.
///
/// Reads never block: with nothing queued they report a timeout while the
/// child is running and end-of-file once it has exited.
pub(crate) struct ScriptedChild {
    spy: Arc<Mutex<Spy>>,
    replies: VecDeque<Reply>,
    pending: VecDeque<Vec<u8>>,
    /// Termination requests ignored before the child dies.
    stubborn: u32,
    /// The child never reads its stdin.
    stalled: bool,
    /// Releases that report a blocked reader thread.
    stuck_releases: u32,
}

impl ScriptedChild {
    /// A child that prints `greeting` on start.
    pub fn new(greeting: &str) -> (Self, Arc<Mutex<Spy>>) {
        let spy = Arc::new(Mutex::new(Spy::default()));
        let mut pending = VecDeque::new();
        if !greeting.is_empty() {
            pending.push_back(greeting.as_bytes().to_vec());
        }
        let child = Self {
            spy: Arc::clone(&spy),
            replies: VecDeque::new(),
            pending,
            stubborn: 0,
            stalled: false,
            stuck_releases: 0,
        };
        (child, spy)
    }

    pub fn reply(mut self, reply: Reply) -> Self {
        self.replies.push_back(reply);
        self
    }

    pub fn stubborn(mut self, ignored_terminations: u32) -> Self {
        self.stubborn = ignored_terminations;
        self
    }

    /// Never take any input.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Fail the first `count` releases with a blocked reader thread.
    pub fn stuck_releases(mut self, count: u32) -> Self {
        self.stuck_releases = count;
        self
    }

    /// Exit right away, before any prompt.
    pub fn exited(self) -> Self {
        self.spy.lock().unwrap().exited = true;
        self
    }

    fn status(&self) -> Option<ExitStatus> {
        self.spy.lock().unwrap().exited.then(ExitStatus::default)
    }
}

impl NonBlockingReader for ScriptedChild {
    fn read_available(&mut self, _deadline: Option<Instant>) -> ReadOutcome {
        let spy = self.spy.lock().unwrap();
        if spy.released {
            return ReadOutcome::Error(io::Error::new(io::ErrorKind::NotConnected, "released"));
        }
        match self.pending.pop_front() {
            Some(data) => ReadOutcome::Data(data),
            None if spy.exited => ReadOutcome::Eof,
            None => ReadOutcome::TimedOut,
        }
    }
}

impl ChildProcess for ScriptedChild {
    fn id(&self) -> u32 {
        4242
    }

    fn write_available(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut spy = self.spy.lock().unwrap();
        if spy.released {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "released"));
        }
        if spy.exited {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "child exited"));
        }
        if self.stalled {
            return Ok(0);
        }
        spy.writes.push(String::from_utf8_lossy(data).into_owned());
        match self.replies.pop_front() {
            Some(Reply::Output(text)) => self.pending.push_back(text.as_bytes().to_vec()),
            Some(Reply::Exit(text)) => {
                self.pending.push_back(text.as_bytes().to_vec());
                spy.exited = true;
            }
            Some(Reply::Silent) | None => {}
        }
        Ok(data.len())
    }

    fn terminate(&mut self) -> io::Result<()> {
        let mut spy = self.spy.lock().unwrap();
        spy.terminations += 1;
        if self.stubborn > 0 {
            self.stubborn -= 1;
        } else {
            spy.exited = true;
        }
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Ok(self.status())
    }

    fn wait_timeout(&mut self, _timeout: Duration) -> io::Result<Option<ExitStatus>> {
        Ok(self.status())
    }

    fn release(&mut self) -> Result<(), CloseError> {
        if self.stuck_releases > 0 {
            self.stuck_releases -= 1;
            return Err(CloseError::ReaderThreads {
                pid: 4242,
                pending: 1,
            });
        }
        self.spy.lock().unwrap().released = true;
        Ok(())
    }
}
