//! REPL construction input and host context.
//!
//! `ReplConfig` is what a configuration loader hands to the bridge. It is
//! serde-compatible so per-language REPL definitions can live in JSON or TOML.
//! `HostContext` is computed once at startup and passed to the spawner
//! instead of patching the process environment.

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::Deserialize;

/// Placeholder in `command` and `cwd` replaced by the bridge's base path.
pub const BASE_PATH_PLACEHOLDER: &str = "{base}";

/// How the child's command line was given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    /// A single string, split with the platform's quoting rules.
    Line(String),

    /// Program followed by its arguments, used verbatim.
    Argv(Vec<String>),
}

impl CommandLine {
    /// Display form used in logs and error messages.
    pub fn display(&self) -> String {
        match self {
            CommandLine::Line(line) => line.clone(),
            CommandLine::Argv(argv) => argv.join(" "),
        }
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        CommandLine::Line(line.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(line: String) -> Self {
        CommandLine::Line(line)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(argv: Vec<String>) -> Self {
        CommandLine::Argv(argv)
    }
}

/// How output is pulled from the child without blocking the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderMode {
    /// Non-blocking descriptors polled with a short sleep. Unix only.
    Polling,

    /// One background thread per stream feeding a bounded queue.
    Threaded,
}

impl ReaderMode {
    /// The preferred mode for the current platform.
    pub fn platform_default() -> Self {
        if cfg!(unix) {
            ReaderMode::Polling
        } else {
            ReaderMode::Threaded
        }
    }
}

impl Default for ReaderMode {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// What happens to the child's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// stderr shares stdout's pipe, so relative ordering is preserved.
    #[default]
    Merged,

    /// stderr gets its own pipe; chunks are interleaved in arrival order.
    Separate,
}

/// Construction input for a REPL session.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplConfig {
    /// Command to run. May contain [`BASE_PATH_PLACEHOLDER`].
    pub command: CommandLine,

    /// Prompt patterns (regex). A trailing `\s*$` is added unless anchored.
    pub prompt: Vec<String>,

    /// Prefix put in front of every output line.
    #[serde(default)]
    pub prefix: String,

    /// Patterns that mark output as an error, matched right after `prefix`.
    #[serde(default)]
    pub error: Vec<String>,

    /// Inputs matching any of these are never sent.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Seconds to wait for a prompt. `None` waits forever.
    #[serde(default = "default_timeout")]
    pub timeout: Option<f64>,

    /// Working directory for the child. May contain [`BASE_PATH_PLACEHOLDER`].
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Variables overlaid on the parent environment.
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Drop the first output line of non-blank inputs (terminal echo).
    #[serde(default)]
    pub strip_echo: bool,

    /// Remove ANSI escape sequences from output before matching.
    #[serde(default)]
    pub strip_ansi: bool,

    #[serde(default)]
    pub reader: ReaderMode,

    #[serde(default)]
    pub stderr: StderrMode,

    /// Sleep between non-blocking read attempts, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Termination attempts made by `close`.
    #[serde(default = "default_close_retries")]
    pub close_retries: u32,

    /// Bytes of already-searched output re-examined on each read.
    #[serde(default = "default_search_depth")]
    pub search_depth: usize,
}

fn default_timeout() -> Option<f64> {
    Some(30.0)
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_close_retries() -> u32 {
    3
}

fn default_search_depth() -> usize {
    1000
}

impl ReplConfig {
    /// Create a config with the given command and prompt and defaults elsewhere.
    pub fn new(command: impl Into<CommandLine>, prompt: Vec<String>) -> Self {
        Self {
            command: command.into(),
            prompt,
            prefix: String::new(),
            error: Vec::new(),
            ignore: Vec::new(),
            timeout: default_timeout(),
            cwd: None,
            env: IndexMap::new(),
            strip_echo: false,
            strip_ansi: false,
            reader: ReaderMode::default(),
            stderr: StderrMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            close_retries: default_close_retries(),
            search_depth: default_search_depth(),
        }
    }

    /// The exchange timeout as a `Duration`, `None` for no timeout.
    ///
    /// Negative and non-finite values are treated as zero.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = if cfg!(windows) {
        r"\$(\w+)|\$\{([^}]*)\}|%(\w+)%"
    } else {
        r"\$(\w+)|\$\{([^}]*)\}"
    };
    Regex::new(pattern).expect("environment variable pattern is valid")
});

/// Immutable facts about the host, captured once.
#[derive(Debug, Clone)]
pub struct HostContext {
    base_path: PathBuf,
    env: IndexMap<OsString, OsString>,
}

impl HostContext {
    /// Snapshot the current process environment.
    pub fn capture(base_path: impl Into<PathBuf>) -> Self {
        Self::new(base_path, std::env::vars_os())
    }

    /// Build a context from an explicit environment.
    pub fn new<I, K, V>(base_path: impl Into<PathBuf>, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            base_path: base_path.into(),
            env: env.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// The bridge's installation base path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Look up a parent environment variable.
    ///
    /// Names are case-insensitive on Windows.
    pub fn var(&self, name: &str) -> Option<&OsStr> {
        if cfg!(windows) {
            self.env
                .iter()
                .find(|(k, _)| k.to_string_lossy().eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_os_str())
        } else {
            self.env.get(OsStr::new(name)).map(OsString::as_os_str)
        }
    }

    /// Expand `$VAR` and `${VAR}` (and `%VAR%` on Windows) against the
    /// parent environment. Unknown variables are left as written.
    pub fn interpolate<'a>(&self, value: &'a str) -> Cow<'a, str> {
        VAR_PATTERN.replace_all(value, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            match self.var(name) {
                Some(v) => v.to_string_lossy().into_owned(),
                None => caps[0].to_string(),
            }
        })
    }

    /// Child environment: parent copy overlaid with interpolated `overlay`.
    pub fn merged_env(&self, overlay: &IndexMap<String, String>) -> IndexMap<OsString, OsString> {
        let mut env = self.env.clone();
        for (key, value) in overlay {
            let value = self.interpolate(value).into_owned();
            if cfg!(windows) {
                env.retain(|k, _| !k.to_string_lossy().eq_ignore_ascii_case(key));
            }
            env.insert(OsString::from(key), OsString::from(value));
        }
        env
    }

    /// Replace [`BASE_PATH_PLACEHOLDER`] with the base path.
    pub fn resolve_placeholder<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if value.contains(BASE_PATH_PLACEHOLDER) {
            Cow::Owned(value.replace(
                BASE_PATH_PLACEHOLDER,
                &self.base_path.to_string_lossy(),
            ))
        } else {
            Cow::Borrowed(value)
        }
    }
}
