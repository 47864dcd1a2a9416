//! Running one exchange off the caller's thread.
//!
//! The session moves into a worker thread for the duration of one
//! `correspond` call and comes back with the result. Both travel in the same
//! oneshot message, so nothing can be read before the exchange is complete.

use std::thread::{self, JoinHandle};

use log::{debug, warn};
use tokio::sync::oneshot;

use super::result::ExchangeResult;
use super::session::Repl;
use crate::error::{Result, SessionError};

type Completion = (Repl, Result<ExchangeResult>);

/// A `correspond` call in flight on a worker thread.
///
/// # Example
///
/// ```rust,no_run
/// use replbridge::{Repl, ReplThread};
/// use std::time::Duration;
///
/// # fn example(repl: Repl) -> Result<(), replbridge::Error> {
/// let mut pending = ReplThread::start(repl, "long_running()\n")?;
/// while !pending.is_finished() {
///     std::thread::sleep(Duration::from_millis(50));
/// }
/// let (repl, result) = pending.join()?;
/// print!("{}", result);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ReplThread {
    input: String,
    rx: Option<oneshot::Receiver<Completion>>,
    handle: Option<JoinHandle<()>>,
    done: Option<std::result::Result<Completion, SessionError>>,
}

impl ReplThread {
    /// Move `repl` into a worker thread and send `input`.
    pub fn start(mut repl: Repl, input: impl Into<String>) -> Result<Self> {
        let input = input.into();
        let (tx, rx) = oneshot::channel();
        let worker_input = input.clone();
        let handle = thread::Builder::new()
            .name(format!("replbridge-correspond-{}", repl.pid()))
            .spawn(move || {
                let result = repl.correspond(&worker_input);
                if tx.send((repl, result)).is_err() {
                    debug!("exchange result dropped, caller went away");
                }
            })
            .map_err(SessionError::WorkerSpawn)?;

        Ok(Self {
            input,
            rx: Some(rx),
            handle: Some(handle),
            done: None,
        })
    }

    /// The input being sent.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Whether the exchange has completed. Never blocks.
    pub fn is_finished(&mut self) -> bool {
        if self.done.is_some() {
            return true;
        }
        let Some(rx) = self.rx.as_mut() else {
            return true;
        };
        match rx.try_recv() {
            Ok(completion) => self.done = Some(Ok(completion)),
            Err(oneshot::error::TryRecvError::Empty) => return false,
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!("worker thread for {:?} ended without a result", self.input);
                self.done = Some(Err(SessionError::WorkerPanicked));
            }
        }
        self.rx = None;
        true
    }

    /// The result, once [`is_finished`](Self::is_finished) has returned
    /// `true`. `None` before that, or if the exchange failed.
    pub fn result(&self) -> Option<&ExchangeResult> {
        match &self.done {
            Some(Ok((_, Ok(result)))) => Some(result),
            _ => None,
        }
    }

    /// Block until the exchange completes and take the session back.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`wait`](Self::wait) there.
    pub fn join(mut self) -> Result<(Repl, ExchangeResult)> {
        let completion = match self.done.take() {
            Some(done) => done,
            None => match self.rx.take() {
                Some(rx) => rx.blocking_recv().map_err(|_| SessionError::WorkerPanicked),
                None => Err(SessionError::WorkerPanicked),
            },
        };
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let (repl, result) = completion?;
        Ok((repl, result?))
    }

    /// Wait for the exchange without blocking the async runtime.
    pub async fn wait(mut self) -> Result<(Repl, ExchangeResult)> {
        let completion = match self.done.take() {
            Some(done) => done,
            None => match self.rx.take() {
                Some(rx) => rx.await.map_err(|_| SessionError::WorkerPanicked),
                None => Err(SessionError::WorkerPanicked),
            },
        };
        // The worker exits right after sending; no need to join it here.
        self.handle = None;
        let (repl, result) = completion?;
        Ok((repl, result?))
    }
}
