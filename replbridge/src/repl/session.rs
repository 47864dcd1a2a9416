//! The REPL session: one child process and its exchange state.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use regex::Regex;

use super::output::{OutputShaper, TextNormalizer};
use super::result::ExchangeResult;
use crate::channel::{
    ExpectEngine, ExpectOutcome, NonBlockingReader, OutputBuffer, PromptPatternSet, ReadOutcome,
};
use crate::config::{HostContext, ReplConfig};
use crate::error::{ChannelError, CloseError, Result, SessionError, StartError};
use crate::process::{ChildProcess, CommandSpawner, SpawnRequest};

/// How long each termination attempt waits for the child to exit.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Longest wait for output while the child's stdin is full.
const WRITE_RETRY: Duration = Duration::from_millis(10);

/// Lifecycle of a [`Repl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    /// Waiting for the first prompt.
    Starting,
    /// Idle and accepting input.
    Ready,
    /// An exchange is in progress.
    Busy,
    /// Shut down; the child is reaped and its pipes released.
    Closed,
    /// No first prompt, or the child or its I/O threads did not stop.
    Failed,
}

/// Compiled per-session policy.
#[derive(Debug, Clone)]
pub struct ReplSettings {
    patterns: PromptPatternSet,
    ignore: Vec<Regex>,
    shaper: OutputShaper,
    timeout: Option<Duration>,
    close_retries: u32,
    search_depth: usize,
    strip_ansi: bool,
}

impl ReplSettings {
    /// Compile the prompt, error and ignore patterns of `config`.
    pub fn compile(config: &ReplConfig) -> std::result::Result<Self, StartError> {
        if config.prompt.is_empty() {
            return Err(StartError::InvalidConfig {
                message: "at least one prompt pattern is required".to_string(),
            });
        }
        if config.search_depth == 0 {
            return Err(StartError::InvalidConfig {
                message: "search_depth must be at least 1".to_string(),
            });
        }
        let patterns = PromptPatternSet::compile(&config.prompt)?;
        let ignore = config
            .ignore
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let shaper =
            OutputShaper::compile(config.prefix.as_str(), &config.error, config.strip_echo)?;

        Ok(Self {
            patterns,
            ignore,
            shaper,
            timeout: config.timeout_duration(),
            close_retries: config.close_retries,
            search_depth: config.search_depth,
            strip_ansi: config.strip_ansi,
        })
    }

    /// Decode child output with `normalizer` instead of lossy UTF-8.
    pub fn with_normalizer(mut self, normalizer: Arc<dyn TextNormalizer>) -> Self {
        self.shaper = self.shaper.with_normalizer(normalizer);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn prefix(&self) -> &str {
        self.shaper.prefix()
    }

    fn is_ignored(&self, input: &str) -> bool {
        self.ignore.iter().any(|re| re.is_match(input))
    }
}

/// An interactive child process driven one exchange at a time.
///
/// # Example
///
/// ```rust,no_run
/// use replbridge::{HostContext, Repl, ReplConfig};
///
/// # fn example() -> Result<(), replbridge::Error> {
/// let mut config = ReplConfig::new("python3 -i -u", vec![">>> ".into()]);
/// config.prefix = "# ".into();
/// config.error = vec!["Traceback".into()];
///
/// let host = HostContext::capture(".");
/// let mut repl = Repl::start(&config, &host)?;
/// let result = repl.correspond("1 + 1\n")?;
/// print!("{}", result);
/// repl.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Repl {
    child: Box<dyn ChildProcess>,
    engine: ExpectEngine,
    settings: ReplSettings,
    state: ReplState,
    banner: String,
    exited: bool,
}

impl std::fmt::Debug for Repl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repl")
            .field("pid", &self.child.id())
            .field("state", &self.state)
            .field("exited", &self.exited)
            .finish_non_exhaustive()
    }
}

impl Repl {
    /// Spawn the configured command and wait for its first prompt.
    pub fn start(config: &ReplConfig, host: &HostContext) -> Result<Self> {
        let settings = ReplSettings::compile(config)?;
        Self::spawn(config, host, settings)
    }

    pub(crate) fn spawn(
        config: &ReplConfig,
        host: &HostContext,
        settings: ReplSettings,
    ) -> Result<Self> {
        let request = SpawnRequest::from_config(config, host)?;
        let child = CommandSpawner::new(host).spawn(&request)?;
        Self::with_child(Box::new(child), settings)
    }

    /// Drive an already running child. Waits for its first prompt.
    ///
    /// If no prompt arrives the child is terminated and released before
    /// `StartError::NoPrompt` is returned.
    pub fn with_child(child: Box<dyn ChildProcess>, settings: ReplSettings) -> Result<Self> {
        let mut buffer = OutputBuffer::new(settings.search_depth);
        if settings.strip_ansi {
            buffer = buffer.with_ansi_stripping();
        }
        let mut repl = Self {
            child,
            engine: ExpectEngine::new(buffer),
            settings,
            state: ReplState::Starting,
            banner: String::new(),
            exited: false,
        };

        let deadline = repl.deadline();
        let outcome = repl
            .engine
            .expect(&mut *repl.child, &repl.settings.patterns, deadline);
        match outcome {
            ExpectOutcome::Matched { before, .. } => {
                repl.banner = String::from_utf8_lossy(&before).into_owned();
                repl.state = ReplState::Ready;
                debug!("process {} ready", repl.child.id());
                Ok(repl)
            }
            ExpectOutcome::TimedOut => {
                let output = repl.engine.buffer().as_str_lossy().into_owned();
                Err(repl.abort_start("timed out waiting for the first prompt", output))
            }
            ExpectOutcome::EndOfFile { before } => {
                let output = String::from_utf8_lossy(&before).into_owned();
                Err(repl.abort_start("process exited before its first prompt", output))
            }
            ExpectOutcome::IoError(e) => {
                let output = repl.engine.buffer().as_str_lossy().into_owned();
                Err(repl.abort_start(&format!("reading output failed: {e}"), output))
            }
        }
    }

    fn abort_start(&mut self, reason: &str, output: String) -> crate::Error {
        debug!("process {} failed to start: {}", self.child.id(), reason);
        if let Err(e) = self.child.terminate() {
            warn!("failed to terminate process {}: {}", self.child.id(), e);
        }
        let _ = self.child.wait_timeout(CLOSE_GRACE);
        if let Err(e) = self.child.release() {
            warn!("{}", e);
        }
        self.state = ReplState::Failed;
        StartError::NoPrompt {
            reason: reason.to_string(),
            output,
        }
        .into()
    }

    fn deadline(&self) -> Option<Instant> {
        self.settings.timeout.map(|t| Instant::now() + t)
    }

    /// Send `input` and collect the output up to the next prompt.
    ///
    /// Timeouts, end-of-file and error-pattern matches are reported in the
    /// result. Only misuse and read failures are errors.
    pub fn correspond(&mut self, input: &str) -> Result<ExchangeResult> {
        if self.state != ReplState::Ready {
            return Err(SessionError::NotReady { state: self.state }.into());
        }
        if self.settings.is_ignored(input) {
            debug!("input {:?} matches an ignore pattern, not sent", input);
            return Ok(ExchangeResult::empty(input));
        }

        self.state = ReplState::Busy;
        let result = self.exchange(input);
        self.state = ReplState::Ready;
        result
    }

    /// Send inputs one after another, stopping after the first result that
    /// [terminates](ExchangeResult::terminates).
    pub fn correspond_all<S: AsRef<str>>(&mut self, inputs: &[S]) -> Result<Vec<ExchangeResult>> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            let result = self.correspond(input.as_ref())?;
            let stop = result.terminates();
            results.push(result);
            if stop {
                break;
            }
        }
        Ok(results)
    }

    fn exchange(&mut self, input: &str) -> Result<ExchangeResult> {
        let start = Instant::now();
        let deadline = self.deadline();
        let sent = input.replace('\t', " ");
        if !self.send(sent.as_bytes(), deadline)? {
            return Ok(ExchangeResult::timed_out(
                input,
                self.settings.shaper.timeout_text(),
                start.elapsed(),
            ));
        }

        let outcome = self
            .engine
            .expect(&mut *self.child, &self.settings.patterns, deadline);
        let shaper = &self.settings.shaper;
        let elapsed = start.elapsed();

        match outcome {
            ExpectOutcome::Matched { before, .. } => {
                let shaped = shaper.shape(input, &before, false);
                Ok(ExchangeResult::new(input, shaped.text, shaped.is_error, elapsed))
            }
            ExpectOutcome::TimedOut => Ok(ExchangeResult::timed_out(
                input,
                shaper.timeout_text(),
                elapsed,
            )),
            ExpectOutcome::EndOfFile { before } => {
                if !self.exited {
                    debug!("process {} output ended", self.child.id());
                    self.exited = true;
                }
                let shaped = shaper.shape(input, &before, true);
                Ok(ExchangeResult::end_of_file(
                    input,
                    shaped.text,
                    shaped.is_error,
                    elapsed,
                ))
            }
            ExpectOutcome::IoError(e) => Err(ChannelError::Io(e).into()),
        }
    }

    /// Write `data` to the child, buffering its output while stdin is full.
    ///
    /// Returns `false` if the deadline passed before everything was written.
    /// A child that stopped reading for good counts as written; the expect
    /// that follows reports its end-of-file.
    fn send(&mut self, data: &[u8], deadline: Option<Instant>) -> Result<bool> {
        let pid = self.child.id();
        let mut written = 0;
        while written < data.len() {
            match self.child.write_available(&data[written..]) {
                Ok(0) => {}
                Ok(n) => {
                    written += n;
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("process {} stdin closed, expecting end-of-file", pid);
                    return Ok(true);
                }
                Err(e) => return Err(ChannelError::Io(e).into()),
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!(
                    "process {} took {} of {} input bytes before the deadline",
                    pid,
                    written,
                    data.len()
                );
                return Ok(false);
            }
            let retry = Instant::now() + WRITE_RETRY;
            let until = deadline.map_or(retry, |d| d.min(retry));
            match self.child.read_available(Some(until)) {
                ReadOutcome::Data(chunk) => self.engine.feed(&chunk),
                ReadOutcome::TimedOut => {}
                ReadOutcome::Eof => {
                    debug!("process {} output ended during input", pid);
                    return Ok(true);
                }
                ReadOutcome::Error(e) => return Err(ChannelError::Io(e).into()),
            }
        }
        Ok(true)
    }

    /// Terminate the child with the configured retry budget.
    pub fn close(&mut self) -> Result<()> {
        self.close_with_retries(self.settings.close_retries)
    }

    /// Terminate the child, retrying up to `max_retries` times.
    ///
    /// An exited child counts as closed. At least one attempt is always made.
    /// The session is closed only once the child's pipes and I/O threads are
    /// released. Closing a closed session does nothing.
    pub fn close_with_retries(&mut self, max_retries: u32) -> Result<()> {
        if self.state == ReplState::Closed {
            return Ok(());
        }
        let pid = self.child.id();
        let attempts = max_retries.max(1);
        let mut detail = String::from("process still running");
        let mut stopped = matches!(self.child.try_wait(), Ok(Some(_)));

        for attempt in 1..=attempts {
            if stopped {
                break;
            }
            if let Err(e) = self.child.terminate() {
                detail = e.to_string();
            }
            match self.child.wait_timeout(CLOSE_GRACE) {
                Ok(Some(status)) => {
                    debug!("process {} exited with {} after {} attempt(s)", pid, status, attempt);
                    stopped = true;
                }
                Ok(None) => warn!(
                    "process {} still running after termination attempt {}",
                    pid,
                    attempt
                ),
                Err(e) => detail = e.to_string(),
            }
        }

        if !stopped {
            self.state = ReplState::Failed;
            return Err(CloseError::RetriesExhausted {
                pid,
                attempts,
                detail,
            }
            .into());
        }

        self.exited = true;
        if let Err(e) = self.child.release() {
            self.state = ReplState::Failed;
            return Err(e.into());
        }
        self.state = ReplState::Closed;
        debug!("process {} closed", pid);
        Ok(())
    }

    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn state(&self) -> ReplState {
        self.state
    }

    /// Output printed before the first prompt.
    pub fn banner(&self) -> &str {
        &self.banner
    }

    /// Whether the child's output ended or the process exited.
    pub fn has_exited(&mut self) -> bool {
        if !self.exited && matches!(self.child.try_wait(), Ok(Some(_))) {
            self.exited = true;
        }
        self.exited
    }

    /// Whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        self.state != ReplState::Closed && self.child.is_alive()
    }

    pub fn settings(&self) -> &ReplSettings {
        &self.settings
    }
}

impl Drop for Repl {
    fn drop(&mut self) {
        if matches!(self.state, ReplState::Closed | ReplState::Failed) {
            return;
        }
        warn!("REPL session {} dropped without close", self.child.id());
        if let Err(e) = self.close() {
            warn!("failed to close REPL session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::repl::testing::{Reply, ScriptedChild};

    fn config() -> ReplConfig {
        let mut config = ReplConfig::new("scripted", vec!["> ".into()]);
        config.prefix = "# ".into();
        config.timeout = Some(1.0);
        config
    }

    fn start(child: ScriptedChild, config: &ReplConfig) -> Repl {
        Repl::with_child(Box::new(child), ReplSettings::compile(config).unwrap()).unwrap()
    }

    #[test]
    fn test_start_keeps_banner() {
        let (child, _spy) = ScriptedChild::new("Welcome v1\n> ");
        let repl = start(child, &config());
        assert_eq!(repl.state(), ReplState::Ready);
        assert_eq!(repl.banner(), "Welcome v1\n");
        assert_eq!(repl.pid(), 4242);
    }

    #[test]
    fn test_start_without_prompt_times_out() {
        let (child, spy) = ScriptedChild::new("loading...");
        let settings = ReplSettings::compile(&config()).unwrap();
        match Repl::with_child(Box::new(child), settings) {
            Err(Error::Start(StartError::NoPrompt { output, .. })) => {
                assert_eq!(output, "loading...")
            }
            other => panic!("unexpected {other:?}"),
        }
        let spy = spy.lock().unwrap();
        assert_eq!(spy.terminations, 1);
        assert!(spy.released);
    }

    #[test]
    fn test_start_child_exits() {
        let (child, spy) = ScriptedChild::new("usage: repl\n");
        let settings = ReplSettings::compile(&config()).unwrap();
        match Repl::with_child(Box::new(child.exited()), settings) {
            Err(Error::Start(StartError::NoPrompt { output, .. })) => {
                assert_eq!(output, "usage: repl\n")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(spy.lock().unwrap().released);
    }

    #[test]
    fn test_empty_prompt_list_rejected() {
        let config = ReplConfig::new("scripted", Vec::new());
        assert!(matches!(
            ReplSettings::compile(&config),
            Err(StartError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_zero_search_depth_rejected() {
        let mut config = config();
        config.search_depth = 0;
        assert!(matches!(
            ReplSettings::compile(&config),
            Err(StartError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut config = config();
        config.error = vec!["(unclosed".into()];
        assert!(matches!(
            ReplSettings::compile(&config),
            Err(StartError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_correspond_writes_once_with_tabs_replaced() {
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child.reply(Reply::Output("2\n> ")), &config());
        let result = repl.correspond("1\t+\t1\n").unwrap();

        assert_eq!(result.text(), "# 2\n");
        assert!(!result.is_timeout());
        assert!(!result.is_eof());
        assert!(!result.is_error());
        assert_eq!(result.input(), "1\t+\t1\n");
        assert_eq!(spy.lock().unwrap().writes, ["1 + 1\n"]);
        assert_eq!(repl.state(), ReplState::Ready);
    }

    #[test]
    fn test_ignored_input_is_not_written() {
        let mut config = config();
        config.ignore = vec![r"^\s*$".into()];
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child, &config);

        let result = repl.correspond("  \n").unwrap();
        assert_eq!(result.text(), "");
        assert!(!result.terminates());
        assert!(spy.lock().unwrap().writes.is_empty());
    }

    #[test]
    fn test_strip_echo() {
        let mut config = config();
        config.strip_echo = true;
        let (child, _spy) = ScriptedChild::new("> ");
        let child = child
            .reply(Reply::Output("print(1)\r\n1\r\n> "))
            .reply(Reply::Output("\r\n> "));
        let mut repl = start(child, &config);

        assert_eq!(repl.correspond("print(1)\n").unwrap().text(), "# 1\n");
        assert_eq!(repl.correspond("\n").unwrap().text(), "");
    }

    #[test]
    fn test_error_classification() {
        let mut config = config();
        config.error = vec!["Traceback".into()];
        let (child, _spy) = ScriptedChild::new("> ");
        let child = child
            .reply(Reply::Output("Traceback (most recent call last)\n> "))
            .reply(Reply::Output("4\n> "));
        let mut repl = start(child, &config);

        let failed = repl.correspond("1/0\n").unwrap();
        assert_eq!(failed.text(), "# Traceback (most recent call last)\n");
        assert!(failed.is_error());
        assert!(!repl.correspond("2+2\n").unwrap().is_error());
    }

    #[test]
    fn test_timeout_keeps_output_for_next_exchange() {
        let (child, _spy) = ScriptedChild::new("> ");
        let child = child
            .reply(Reply::Output("slow"))
            .reply(Reply::Output(" done\n> "));
        let mut repl = start(child, &config());

        let timed_out = repl.correspond("sleep\n").unwrap();
        assert!(timed_out.is_timeout());
        assert_eq!(timed_out.text(), "# Execution timed out.\n");
        assert_eq!(repl.state(), ReplState::Ready);

        let next = repl.correspond("\n").unwrap();
        assert_eq!(next.text(), "# slow done\n");
    }

    #[test]
    fn test_silent_child_times_out() {
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child.reply(Reply::Silent), &config());
        let result = repl.correspond("while True: pass\n").unwrap();
        assert!(result.is_timeout());
        assert!(result.terminates());
        assert_eq!(spy.lock().unwrap().writes.len(), 1);
    }

    #[test]
    fn test_child_not_reading_input_times_out() {
        let mut config = config();
        config.timeout = Some(0.2);
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child.stalled(), &config);

        let started = Instant::now();
        let result = repl.correspond("x = 1\n").unwrap();
        assert!(result.is_timeout());
        assert_eq!(result.text(), "# Execution timed out.\n");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(repl.state(), ReplState::Ready);
        assert!(spy.lock().unwrap().writes.is_empty());
    }

    #[test]
    fn test_every_exchange_after_exit_is_eof() {
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child.reply(Reply::Exit("bye\n")), &config());

        let first = repl.correspond("quit\n").unwrap();
        assert!(first.is_eof());
        assert_eq!(first.text(), "# bye\n#  [exit]\n");
        assert!(repl.has_exited());

        for _ in 0..3 {
            let again = repl.correspond("1\n").unwrap();
            assert!(again.is_eof());
            assert_eq!(again.text().matches(" [exit]").count(), 1);
        }
        assert_eq!(spy.lock().unwrap().writes, ["quit\n"]);
    }

    #[test]
    fn test_correspond_all_stops_on_error() {
        let mut config = config();
        config.error = vec!["Error".into()];
        let (child, spy) = ScriptedChild::new("> ");
        let child = child
            .reply(Reply::Output("1\n> "))
            .reply(Reply::Output("Error: nope\n> "))
            .reply(Reply::Output("3\n> "));
        let mut repl = start(child, &config);

        let results = repl.correspond_all(&["a\n", "b\n", "c\n"]).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_error());
        assert_eq!(spy.lock().unwrap().writes, ["a\n", "b\n"]);
    }

    #[test]
    fn test_close_retries_stubborn_child() {
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child.stubborn(2), &config());
        repl.close_with_retries(3).unwrap();
        assert_eq!(repl.state(), ReplState::Closed);
        assert_eq!(spy.lock().unwrap().terminations, 3);
        assert!(spy.lock().unwrap().released);
    }

    #[test]
    fn test_close_gives_up() {
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child.stubborn(10), &config());
        match repl.close_with_retries(3) {
            Err(Error::Close(CloseError::RetriesExhausted { pid, attempts, .. })) => {
                assert_eq!(pid, 4242);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(repl.state(), ReplState::Failed);
        assert!(!spy.lock().unwrap().released);
    }

    #[test]
    fn test_close_waits_for_blocked_reader() {
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child.stuck_releases(1), &config());

        match repl.close() {
            Err(Error::Close(CloseError::ReaderThreads { pid, pending })) => {
                assert_eq!(pid, 4242);
                assert_eq!(pending, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(repl.state(), ReplState::Failed);
        assert!(!spy.lock().unwrap().released);

        repl.close().unwrap();
        assert_eq!(repl.state(), ReplState::Closed);
        assert!(spy.lock().unwrap().released);
        assert_eq!(spy.lock().unwrap().terminations, 1);
    }

    #[test]
    fn test_close_twice_and_use_after_close() {
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child, &config());
        repl.close().unwrap();
        repl.close().unwrap();
        assert_eq!(spy.lock().unwrap().terminations, 1);
        assert!(!repl.is_alive());
        assert!(matches!(
            repl.correspond("1\n"),
            Err(Error::Session(SessionError::NotReady {
                state: ReplState::Closed
            }))
        ));
    }

    #[test]
    fn test_close_after_exit_skips_terminate() {
        let (child, spy) = ScriptedChild::new("> ");
        let mut repl = start(child.reply(Reply::Exit("")), &config());
        assert!(repl.correspond("exit\n").unwrap().is_eof());
        repl.close().unwrap();
        assert_eq!(spy.lock().unwrap().terminations, 0);
    }

    #[test]
    fn test_drop_closes() {
        let (child, spy) = ScriptedChild::new("> ");
        drop(start(child, &config()));
        assert!(spy.lock().unwrap().released);
    }

    #[test]
    fn test_settings_accessors() {
        let settings = ReplSettings::compile(&config()).unwrap();
        assert_eq!(settings.prefix(), "# ");
        assert_eq!(settings.timeout(), Some(Duration::from_secs(1)));
    }

    #[cfg(unix)]
    mod e2e {
        use super::*;
        use crate::config::ReaderMode;

        const ARITHMETIC: &str = concat!(
            r#"printf "> "; while read l; do "#,
            r#"if [ "$l" = die ]; then kill -9 $$; fi; echo $(($l)); printf "> "; done"#,
        );

        fn sh_config(script: &str) -> ReplConfig {
            let mut config = ReplConfig::new(
                vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                vec![">".into()],
            );
            config.prefix = "# ".into();
            config.timeout = Some(2.0);
            config
        }

        fn host() -> HostContext {
            HostContext::capture(".")
        }

        #[test]
        fn test_arithmetic_exchange() {
            let mut repl = Repl::start(&sh_config(ARITHMETIC), &host()).unwrap();
            let result = repl.correspond("1+1\n").unwrap();
            assert_eq!(result.text(), "# 2\n");
            assert!(!result.is_timeout());
            assert!(!result.is_eof());
            assert!(!result.is_error());
            assert!(repl.is_alive());
            repl.close().unwrap();
            repl.close().unwrap();
            assert!(repl.has_exited());
        }

        #[test]
        fn test_threaded_reader_exchange() {
            let mut config = sh_config(ARITHMETIC);
            config.reader = ReaderMode::Threaded;
            let mut repl = Repl::start(&config, &host()).unwrap();
            assert_eq!(repl.correspond("6*7\n").unwrap().text(), "# 42\n");
            repl.close().unwrap();
        }

        #[test]
        fn test_killed_child_is_eof() {
            let mut repl = Repl::start(&sh_config(ARITHMETIC), &host()).unwrap();
            let started = Instant::now();
            let result = repl.correspond("die\n").unwrap();
            assert!(result.is_eof());
            assert_eq!(result.text(), "#  [exit]\n");
            assert!(started.elapsed() < Duration::from_secs(2));
            assert!(repl.correspond("1\n").unwrap().is_eof());
            repl.close().unwrap();
        }

        #[test]
        fn test_externally_killed_child_is_eof() {
            let mut repl = Repl::start(&sh_config(ARITHMETIC), &host()).unwrap();
            // SAFETY: kill has no memory-safety preconditions.
            let ret = unsafe { libc::kill(repl.pid() as libc::pid_t, libc::SIGKILL) };
            assert_eq!(ret, 0);
            let deadline = Instant::now() + Duration::from_secs(2);
            while repl.is_alive() {
                assert!(Instant::now() < deadline, "child survived SIGKILL");
                std::thread::sleep(Duration::from_millis(10));
            }

            let started = Instant::now();
            let result = repl.correspond("1+1\n").unwrap();
            assert!(result.is_eof());
            assert!(!result.is_timeout());
            assert_eq!(result.text(), "#  [exit]\n");
            assert!(started.elapsed() < Duration::from_secs(2));
            repl.close().unwrap();
        }

        fn large_input() -> String {
            let mut input = "x".repeat(1 << 20);
            input.push('\n');
            input
        }

        fn assert_large_input_times_out(script: &str) {
            for mode in [ReaderMode::Polling, ReaderMode::Threaded] {
                let mut config = sh_config(script);
                config.timeout = Some(1.0);
                config.reader = mode;
                let mut repl = Repl::start(&config, &host()).unwrap();

                let started = Instant::now();
                let result = repl.correspond(&large_input()).unwrap();
                assert!(result.is_timeout(), "{mode:?}: {result:?}");
                assert!(started.elapsed() < Duration::from_secs(4), "{mode:?}");
                assert_eq!(repl.state(), ReplState::Ready);
                repl.close().unwrap();
            }
        }

        #[test]
        fn test_large_input_to_hung_child_times_out() {
            assert_large_input_times_out(r#"printf "> "; exec sleep 30"#);
        }

        #[test]
        fn test_large_input_to_echoing_child_times_out() {
            assert_large_input_times_out(r#"printf "> "; exec cat"#);
        }

        #[test]
        fn test_silent_child_fails_to_start() {
            let mut config = sh_config("sleep 5");
            config.timeout = Some(0.2);
            assert!(matches!(
                Repl::start(&config, &host()),
                Err(Error::Start(StartError::NoPrompt { .. }))
            ));
        }

        #[test]
        fn test_stderr_is_captured() {
            let script = r#"printf "> "; while read l; do echo "oops: $l" >&2; printf "> "; done"#;
            let mut config = sh_config(script);
            config.error = vec!["oops".into()];
            let mut repl = Repl::start(&config, &host()).unwrap();
            let result = repl.correspond("x\n").unwrap();
            assert_eq!(result.text(), "# oops: x\n");
            assert!(result.is_error());
            repl.close().unwrap();
        }
    }
}
