//! Builder for creating REPL sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::output::TextNormalizer;
use super::session::{Repl, ReplSettings};
use crate::config::{CommandLine, HostContext, ReaderMode, ReplConfig, StderrMode};
use crate::error::{Result, StartError};

/// Builder for constructing REPL sessions.
///
/// # Example
///
/// ```rust,no_run
/// use replbridge::{HostContext, ReplBuilder};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), replbridge::Error> {
/// let host = HostContext::capture("/opt/bridge");
/// let mut repl = ReplBuilder::new("{base}/bin/node -i")
///     .prompt("> ")
///     .prefix("// ")
///     .error("Uncaught")
///     .ignore(r"^\s*$")
///     .timeout(Duration::from_secs(10))
///     .env("NODE_NO_READLINE", "1")
///     .start(&host)?;
/// # Ok(())
/// # }
/// ```
pub struct ReplBuilder {
    config: ReplConfig,
    normalizer: Option<Arc<dyn TextNormalizer>>,
}

impl ReplBuilder {
    /// Create a new builder for the given command.
    pub fn new(command: impl Into<CommandLine>) -> Self {
        Self {
            config: ReplConfig::new(command, Vec::new()),
            normalizer: None,
        }
    }

    /// Start from a deserialized configuration.
    pub fn from_config(config: ReplConfig) -> Self {
        Self {
            config,
            normalizer: None,
        }
    }

    /// Add a prompt pattern. Patterns are tried in the order added.
    pub fn prompt(mut self, pattern: impl Into<String>) -> Self {
        self.config.prompt.push(pattern.into());
        self
    }

    /// Set the prefix put in front of every output line.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Add an error pattern.
    pub fn error(mut self, pattern: impl Into<String>) -> Self {
        self.config.error.push(pattern.into());
        self
    }

    /// Add an ignore pattern.
    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.config.ignore.push(pattern.into());
        self
    }

    /// Set the exchange timeout (default: 30 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout.as_secs_f64());
        self
    }

    /// Wait for prompts forever.
    pub fn no_timeout(mut self) -> Self {
        self.config.timeout = None;
        self
    }

    /// Set the child's working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.config.cwd = Some(cwd.into());
        self
    }

    /// Overlay one environment variable. `$VAR` references are expanded.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    pub fn strip_echo(mut self, enabled: bool) -> Self {
        self.config.strip_echo = enabled;
        self
    }

    pub fn strip_ansi(mut self, enabled: bool) -> Self {
        self.config.strip_ansi = enabled;
        self
    }

    /// Set how the child's output is read.
    pub fn reader(mut self, mode: ReaderMode) -> Self {
        self.config.reader = mode;
        self
    }

    /// Set whether stderr shares stdout's pipe.
    pub fn stderr(mut self, mode: StderrMode) -> Self {
        self.config.stderr = mode;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the number of termination attempts made by `close` (default: 3).
    pub fn close_retries(mut self, retries: u32) -> Self {
        self.config.close_retries = retries;
        self
    }

    pub fn search_depth(mut self, depth: usize) -> Self {
        self.config.search_depth = depth;
        self
    }

    /// Decode output lines with a custom normalizer.
    pub fn normalizer(mut self, normalizer: Arc<dyn TextNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Build the configuration without starting anything.
    pub fn build(self) -> std::result::Result<ReplConfig, StartError> {
        if self.config.prompt.is_empty() {
            return Err(StartError::InvalidConfig {
                message: "at least one prompt pattern is required".to_string(),
            });
        }
        Ok(self.config)
    }

    /// Spawn the child and wait for its first prompt.
    pub fn start(self, host: &HostContext) -> Result<Repl> {
        let mut settings = ReplSettings::compile(&self.config)?;
        if let Some(normalizer) = self.normalizer {
            settings = settings.with_normalizer(normalizer);
        }
        Repl::spawn(&self.config, host, settings)
    }
}
