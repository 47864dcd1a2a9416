//! Starting child processes with redirected standard streams.

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;

use indexmap::IndexMap;
use log::debug;

#[cfg(unix)]
use crate::channel::{NonBlocking, PollingReader};
use crate::channel::{QueueReader, QueueWriter, StreamId};
use crate::config::{CommandLine, HostContext, ReaderMode, ReplConfig, StderrMode};
use crate::error::StartError;

use super::command_line::split_command_line;
use super::piped::{PipedChild, ReaderBackend, StdinPipe};

/// Everything needed to start one child.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Program name or path.
    pub program: String,

    /// Arguments, not including the program.
    pub args: Vec<String>,

    /// Working directory.
    pub cwd: Option<PathBuf>,

    /// Variables overlaid on the host environment.
    pub env: IndexMap<String, String>,

    pub reader_mode: ReaderMode,

    pub stderr_mode: StderrMode,

    /// Sleep between polls in [`ReaderMode::Polling`].
    pub poll_interval: Duration,

    /// Largest chunk returned by one read.
    pub chunk_size: usize,

    /// Chunks buffered per child in [`ReaderMode::Threaded`].
    pub queue_capacity: usize,
}

impl SpawnRequest {
    /// Create a request with default reader settings.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: IndexMap::new(),
            reader_mode: ReaderMode::default(),
            stderr_mode: StderrMode::default(),
            poll_interval: Duration::from_millis(10),
            chunk_size: 4096,
            queue_capacity: 64,
        }
    }

    /// Build a request from REPL configuration.
    ///
    /// Resolves the base path placeholder and splits a string command line.
    pub fn from_config(config: &ReplConfig, host: &HostContext) -> Result<Self, StartError> {
        let mut argv = match &config.command {
            CommandLine::Line(line) => split_command_line(&host.resolve_placeholder(line))?,
            CommandLine::Argv(argv) => argv
                .iter()
                .map(|arg| host.resolve_placeholder(arg).into_owned())
                .collect(),
        };
        if argv.is_empty() {
            return Err(StartError::InvalidConfig {
                message: "command is empty".to_string(),
            });
        }
        let program = argv.remove(0);

        let cwd = config.cwd.as_ref().map(|cwd| {
            PathBuf::from(host.resolve_placeholder(&cwd.to_string_lossy()).into_owned())
        });

        Ok(Self {
            cwd,
            env: config.env.clone(),
            reader_mode: config.reader,
            stderr_mode: config.stderr,
            poll_interval: config.poll_interval(),
            ..Self::new(program, argv)
        })
    }

    /// Display form for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Read ends of the child's output pipes.
enum OutputPipes {
    Merged(std::io::PipeReader),
    Separate(std::process::ChildStdout, std::process::ChildStderr),
}

/// Starts children against an immutable host context.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpawner<'a> {
    host: &'a HostContext,
}

impl<'a> CommandSpawner<'a> {
    pub fn new(host: &'a HostContext) -> Self {
        Self { host }
    }

    /// Start the child and attach its output reader and stdin writer.
    ///
    /// # Errors
    ///
    /// Returns `StartError::CommandNotFound` if the program is not on the
    /// merged `PATH`, and `StartError::Spawn` if the OS refuses to create
    /// the process or its pipes.
    pub fn spawn(&self, request: &SpawnRequest) -> Result<PipedChild, StartError> {
        let display = request.display();
        let env = self.host.merged_env(&request.env);
        let spawn_error = |source| StartError::Spawn {
            command: display.clone(),
            source,
        };

        let cwd = match &request.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().map_err(spawn_error)?,
        };
        let executable = which::which_in(&request.program, lookup(&env, "PATH"), &cwd)
            .map_err(|e| {
                debug!("lookup of {} failed: {}", request.program, e);
                StartError::CommandNotFound {
                    command: request.program.clone(),
                }
            })?;

        // The Command holds the parent's copies of the pipe write ends and
        // must be dropped right after spawning, or EOF never arrives.
        let (mut child, output, stdin) = {
            let mut command = Command::new(&executable);
            command
                .args(&request.args)
                .env_clear()
                .envs(&env)
                .stdin(Stdio::piped());
            if let Some(cwd) = &request.cwd {
                command.current_dir(cwd);
            }
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                const CREATE_NO_WINDOW: u32 = 0x0800_0000;
                command.creation_flags(CREATE_NO_WINDOW);
            }

            let merged = match request.stderr_mode {
                StderrMode::Merged => {
                    let (reader, writer) = std::io::pipe().map_err(spawn_error)?;
                    let err_writer = writer.try_clone().map_err(spawn_error)?;
                    command.stdout(writer).stderr(err_writer);
                    Some(reader)
                }
                StderrMode::Separate => {
                    command.stdout(Stdio::piped()).stderr(Stdio::piped());
                    None
                }
            };

            let mut child = command.spawn().map_err(spawn_error)?;
            let Some(stdin) = child.stdin.take() else {
                kill_quietly(&mut child);
                return Err(spawn_error(std::io::Error::other("child stdin pipe missing")));
            };
            let output = match merged {
                Some(reader) => OutputPipes::Merged(reader),
                None => match (child.stdout.take(), child.stderr.take()) {
                    (Some(out), Some(err)) => OutputPipes::Separate(out, err),
                    _ => {
                        kill_quietly(&mut child);
                        return Err(spawn_error(std::io::Error::other(
                            "child output pipes missing",
                        )));
                    }
                },
            };
            (child, output, stdin)
        };

        debug!(
            "spawned process {} ({}) with {:?} reader",
            child.id(),
            display,
            request.reader_mode
        );

        let (reader, stdin) = match attach_streams(request, output, stdin) {
            Ok(streams) => streams,
            Err(e) => {
                kill_quietly(&mut child);
                return Err(spawn_error(e));
            }
        };

        Ok(PipedChild::new(display, child, reader, stdin))
    }
}

/// Wrap the child's pipes for deadline-bounded reads and writes.
fn attach_streams(
    request: &SpawnRequest,
    output: OutputPipes,
    stdin: ChildStdin,
) -> std::io::Result<(ReaderBackend, StdinPipe)> {
    match request.reader_mode {
        #[cfg(unix)]
        ReaderMode::Polling => {
            let stdin = StdinPipe::NonBlocking(NonBlocking::new(stdin)?);
            let mut reader = PollingReader::new(request.poll_interval, request.chunk_size);
            match output {
                OutputPipes::Merged(out) => {
                    reader.attach(StreamId::Stdout, NonBlocking::new(out)?);
                }
                OutputPipes::Separate(out, err) => {
                    reader.attach(StreamId::Stdout, NonBlocking::new(out)?);
                    reader.attach(StreamId::Stderr, NonBlocking::new(err)?);
                }
            }
            Ok((ReaderBackend::Polling(reader), stdin))
        }
        #[cfg(not(unix))]
        ReaderMode::Polling => {
            debug!("non-blocking pipes unavailable on this platform, using I/O threads");
            attach_threads(request, output, stdin)
        }
        ReaderMode::Threaded => attach_threads(request, output, stdin),
    }
}

fn attach_threads(
    request: &SpawnRequest,
    output: OutputPipes,
    stdin: ChildStdin,
) -> std::io::Result<(ReaderBackend, StdinPipe)> {
    let mut reader = QueueReader::new(request.queue_capacity, request.chunk_size);
    let mut attach = |id: StreamId, source: Box<dyn Read + Send>| reader.attach(id, source);
    match output {
        OutputPipes::Merged(out) => attach(StreamId::Stdout, Box::new(out))?,
        OutputPipes::Separate(out, err) => {
            attach(StreamId::Stdout, Box::new(out))?;
            attach(StreamId::Stderr, Box::new(err))?;
        }
    }
    let writer = QueueWriter::spawn(stdin, request.chunk_size)?;
    Ok((ReaderBackend::Queue(reader), StdinPipe::Queue(writer)))
}

fn lookup<'e>(env: &'e IndexMap<OsString, OsString>, name: &str) -> Option<&'e OsStr> {
    env.iter()
        .find(|(k, _)| {
            if cfg!(windows) {
                k.to_string_lossy().eq_ignore_ascii_case(name)
            } else {
                k.as_os_str() == name
            }
        })
        .map(|(_, v)| v.as_os_str())
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::channel::{NonBlockingReader, ReadOutcome};
    use crate::process::ChildProcess;

    fn host() -> HostContext {
        HostContext::new(
            "/opt/bridge",
            [("PATH", "/usr/bin:/bin"), ("GREETING", "hello")],
        )
    }

    fn read_all(child: &mut PipedChild) -> Vec<u8> {
        let deadline = Some(Instant::now() + Duration::from_secs(5));
        let mut out = Vec::new();
        loop {
            match child.read_available(deadline) {
                ReadOutcome::Data(data) => out.extend(data),
                ReadOutcome::Eof => return out,
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    fn sh(script: &str, mode: ReaderMode) -> SpawnRequest {
        SpawnRequest {
            reader_mode: mode,
            ..SpawnRequest::new("sh", vec!["-c".into(), script.into()])
        }
    }

    #[test]
    fn test_spawn_polling_reads_output() {
        let host = host();
        let mut child = CommandSpawner::new(&host)
            .spawn(&sh("echo out; echo err >&2", ReaderMode::Polling))
            .unwrap();
        assert_eq!(read_all(&mut child), b"out\nerr\n");
        assert!(child.wait_timeout(Duration::from_secs(5)).unwrap().is_some());
        child.release().unwrap();
    }

    #[test]
    fn test_spawn_threaded_separate_stderr() {
        let host = host();
        let mut request = sh("echo out; echo err >&2", ReaderMode::Threaded);
        request.stderr_mode = StderrMode::Separate;
        let mut child = CommandSpawner::new(&host).spawn(&request).unwrap();
        let mut output = read_all(&mut child);
        output.sort_unstable();
        let mut expected = b"out\nerr\n".to_vec();
        expected.sort_unstable();
        assert_eq!(output, expected);
        child.release().unwrap();
    }

    #[test]
    fn test_env_overlay_reaches_child() {
        let host = host();
        let mut request = sh("echo $MSG", ReaderMode::Polling);
        request.env.insert("MSG".into(), "${GREETING} world".into());
        let mut child = CommandSpawner::new(&host).spawn(&request).unwrap();
        assert_eq!(read_all(&mut child), b"hello world\n");
    }

    #[test]
    fn test_cwd_is_applied() {
        let host = host();
        let mut request = sh("pwd", ReaderMode::Threaded);
        request.cwd = Some(PathBuf::from("/"));
        let mut child = CommandSpawner::new(&host).spawn(&request).unwrap();
        assert_eq!(read_all(&mut child), b"/\n");
    }

    #[test]
    fn test_missing_command() {
        let host = host();
        let request = SpawnRequest::new("no-such-repl-binary", Vec::new());
        assert!(matches!(
            CommandSpawner::new(&host).spawn(&request),
            Err(StartError::CommandNotFound { .. })
        ));
    }

    #[test]
    fn test_relative_program_resolved_against_cwd() {
        let host = host();
        let mut request = SpawnRequest::new("./sh", vec!["-c".into(), "echo found".into()]);
        request.cwd = Some(PathBuf::from("/bin"));
        let mut child = CommandSpawner::new(&host).spawn(&request).unwrap();
        assert_eq!(read_all(&mut child), b"found\n");
    }

    #[test]
    fn test_missing_path_finds_nothing() {
        let host = HostContext::new("/opt/bridge", [("HOME", "/")]);
        let request = SpawnRequest::new("sh", Vec::new());
        assert!(matches!(
            CommandSpawner::new(&host).spawn(&request),
            Err(StartError::CommandNotFound { .. })
        ));
    }

    #[test]
    fn test_stdin_reaches_child() {
        for mode in [ReaderMode::Polling, ReaderMode::Threaded] {
            let host = host();
            let mut child = CommandSpawner::new(&host)
                .spawn(&sh("read l; echo got $l", mode))
                .unwrap();
            assert_eq!(child.write_available(b"ping\n").unwrap(), 5);
            assert_eq!(read_all(&mut child), b"got ping\n");
            assert!(child.wait_timeout(Duration::from_secs(5)).unwrap().is_some());
            child.release().unwrap();
        }
    }

    #[test]
    fn test_full_stdin_does_not_block() {
        for mode in [ReaderMode::Polling, ReaderMode::Threaded] {
            let host = host();
            let mut child = CommandSpawner::new(&host)
                .spawn(&sh("exec sleep 30", mode))
                .unwrap();
            let data = vec![b'x'; 64 * 1024];
            let deadline = Instant::now() + Duration::from_secs(5);
            while child.write_available(&data).unwrap() > 0 {
                assert!(Instant::now() < deadline, "stdin never filled");
            }
            child.terminate().unwrap();
            assert!(child.wait_timeout(Duration::from_secs(5)).unwrap().is_some());
            child.release().unwrap();
        }
    }

    #[test]
    fn test_writes_after_release_fail() {
        let host = host();
        let mut child = CommandSpawner::new(&host)
            .spawn(&sh("cat", ReaderMode::Polling))
            .unwrap();
        child.terminate().unwrap();
        assert!(child.wait_timeout(Duration::from_secs(5)).unwrap().is_some());
        child.release().unwrap();
        assert!(child.write_available(b"x").is_err());
        assert!(matches!(child.read_available(None), ReadOutcome::Error(_)));
    }

    #[test]
    fn test_request_from_config() {
        let host = host();
        let mut config = ReplConfig::new("python -u '{base}/my repl.py'", vec![">>> ".into()]);
        config.cwd = Some(PathBuf::from("{base}/work"));
        let request = SpawnRequest::from_config(&config, &host).unwrap();
        assert_eq!(request.program, "python");
        assert_eq!(request.args, ["-u", "/opt/bridge/my repl.py"]);
        assert_eq!(request.cwd, Some(PathBuf::from("/opt/bridge/work")));
    }

    #[test]
    fn test_empty_command_rejected() {
        let host = host();
        let config = ReplConfig::new("   ", vec![">".into()]);
        assert!(matches!(
            SpawnRequest::from_config(&config, &host),
            Err(StartError::InvalidConfig { .. })
        ));
    }
}
