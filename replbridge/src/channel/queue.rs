//! Background reader threads feeding a bounded queue.
//!
//! Where pipes cannot be polled for readiness, each output stream gets a
//! thread that blocks in `read` and forwards what it gets. The caller drains
//! the queue with a deadline. After a stream's `Eof` or `Error` message its
//! thread has exited and nothing more arrives for that stream.

use std::io::{self, Read};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, trace, warn};

use super::reader::{Exhaustion, NonBlockingReader, ReadOutcome, StreamId};

/// What a reader thread observed.
#[derive(Debug)]
pub enum ReaderEvent {
    Data(Vec<u8>),
    Eof,
    Error(io::Error),
}

/// One message on the queue.
#[derive(Debug)]
pub struct ReaderMessage {
    pub stream: StreamId,
    pub event: ReaderEvent,
}

/// Consumer side of the reader threads.
#[derive(Debug)]
pub struct QueueReader {
    tx: Option<Sender<ReaderMessage>>,
    rx: Receiver<ReaderMessage>,
    workers: Vec<(StreamId, JoinHandle<()>)>,
    live: Vec<StreamId>,
    chunk_size: usize,
    state: Exhaustion,
}

impl QueueReader {
    /// Create a reader whose queue holds at most `capacity` chunks.
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx: Some(tx),
            rx,
            workers: Vec::with_capacity(2),
            live: Vec::with_capacity(2),
            chunk_size: chunk_size.max(1),
            state: Exhaustion::Live,
        }
    }

    /// Start a thread reading `source` into the queue.
    pub fn attach<R>(&mut self, stream: StreamId, source: R) -> io::Result<()>
    where
        R: Read + Send + 'static,
    {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "reader closed"))?;
        let handle = spawn_reader_thread(stream, source, tx, self.chunk_size)?;
        self.workers.push((stream, handle));
        self.live.push(stream);
        Ok(())
    }

    /// Stop accepting output and join the reader threads.
    ///
    /// The queue is dropped first so a thread blocked on a full queue wakes
    /// up. Threads still blocked in `read` after `grace` are kept and waited
    /// for again by the next call; the number of such threads is returned.
    pub fn close(&mut self, grace: Duration) -> usize {
        self.tx = None;
        self.rx = crossbeam_channel::never();
        self.state = Exhaustion::Failed(
            io::ErrorKind::NotConnected,
            "output streams closed".to_string(),
        );

        let deadline = Instant::now() + grace;
        let mut blocked = Vec::new();
        for (stream, handle) in self.workers.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("{stream} reader thread panicked");
                }
            } else {
                warn!("{stream} reader thread still blocked");
                blocked.push((stream, handle));
            }
        }
        self.workers = blocked;
        self.workers.len()
    }

    fn handle(&mut self, message: ReaderMessage) -> Option<ReadOutcome> {
        match message.event {
            ReaderEvent::Data(data) => {
                trace!("dequeued {} bytes from {}", data.len(), message.stream);
                Some(ReadOutcome::Data(data))
            }
            ReaderEvent::Eof => {
                debug!("{} reached end-of-file", message.stream);
                self.live.retain(|s| *s != message.stream);
                if self.live.is_empty() {
                    self.state = Exhaustion::Eof;
                    Some(ReadOutcome::Eof)
                } else {
                    None
                }
            }
            ReaderEvent::Error(e) => {
                self.live.retain(|s| *s != message.stream);
                Some(self.state.fail(message.stream, &e))
            }
        }
    }
}

impl NonBlockingReader for QueueReader {
    fn read_available(&mut self, deadline: Option<Instant>) -> ReadOutcome {
        // Streams are attached before the first read. Dropping our sender
        // lets a vanished reader thread show up as a disconnect.
        self.tx = None;
        loop {
            if let Some(outcome) = self.state.outcome() {
                return outcome;
            }
            if self.live.is_empty() {
                self.state = Exhaustion::Eof;
                continue;
            }

            let received = match deadline {
                Some(deadline) => self.rx.recv_deadline(deadline),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(message) => {
                    if let Some(outcome) = self.handle(message) {
                        return outcome;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return ReadOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => {
                    self.live.clear();
                    self.state = Exhaustion::Eof;
                }
            }
        }
    }
}

/// Spawn a thread that forwards everything read from `source` to `tx`.
pub fn spawn_reader_thread<R>(
    stream: StreamId,
    mut source: R,
    tx: Sender<ReaderMessage>,
    chunk_size: usize,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("replbridge-{stream}"))
        .spawn(move || {
            let mut buf = vec![0u8; chunk_size];
            loop {
                let event = match source.read(&mut buf) {
                    Ok(0) => ReaderEvent::Eof,
                    Ok(n) => ReaderEvent::Data(buf[..n].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => ReaderEvent::Error(e),
                };
                let last = !matches!(event, ReaderEvent::Data(_));
                if tx.send(ReaderMessage { stream, event }).is_err() || last {
                    break;
                }
            }
        })
}
