//! Background writer thread for the child's stdin.
//!
//! Where a pipe cannot be switched to non-blocking mode, a thread does the
//! blocking `write_all` and the caller hands it chunks through a bounded
//! queue. A full queue means the child is not reading, so offering more data
//! returns `0` instead of waiting.

use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError, bounded};
use log::{debug, warn};

/// Producer side of a stdin writer thread.
#[derive(Debug)]
pub struct QueueWriter {
    tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
    chunk_size: usize,
}

impl QueueWriter {
    /// Start a thread writing queued chunks to `sink`.
    pub fn spawn<W>(mut sink: W, chunk_size: usize) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = bounded::<Vec<u8>>(1);
        let handle = thread::Builder::new()
            .name("replbridge-stdin".to_string())
            .spawn(move || {
                for chunk in rx {
                    if let Err(e) = sink.write_all(&chunk).and_then(|()| sink.flush()) {
                        debug!("stdin writer stopped: {e}");
                        break;
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Queue up to one chunk of `data` without waiting.
    ///
    /// Returns the number of bytes queued, `0` while the writer is still busy
    /// with earlier chunks. Fails with `BrokenPipe` once the thread stopped.
    pub fn write_available(&mut self, data: &[u8]) -> io::Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stdin already closed"))?;
        let n = data.len().min(self.chunk_size);
        match tx.try_send(data[..n].to_vec()) {
            Ok(()) => Ok(n),
            Err(TrySendError::Full(_)) => Ok(0),
            Err(TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdin writer stopped",
            )),
        }
    }

    /// Stop accepting data and wait up to `grace` for the thread.
    ///
    /// Returns `false` if the thread is still blocked; a later call waits
    /// for it again.
    pub fn close(&mut self, grace: Duration) -> bool {
        self.tx = None;
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + grace;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if !handle.is_finished() {
            warn!("stdin writer thread still blocked");
            self.handle = Some(handle);
            return false;
        }
        if handle.join().is_err() {
            warn!("stdin writer thread panicked");
        }
        true
    }
}
