//! Worksheet example: evaluate a file line by line
//!
//! Every line of the input file is sent to a REPL on a worker thread, and the
//! output is printed under the line that produced it, prefixed so it is easy
//! to tell apart from the source.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example worksheet -- script.py
//! cargo run --example worksheet -- script.rb --config irb.json
//! ```
//!
//! A config file holds a JSON `ReplConfig`, for example:
//!
//! ```json
//! {
//!     "command": ["irb", "--noreadline", "--prompt", "simple"],
//!     "prompt": [">> ", "\\?> "],
//!     "prefix": "# => ",
//!     "error": ["\\w+Error"],
//!     "ignore": ["^\\s*$"],
//!     "timeout": 10
//! }
//! ```

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use replbridge::{HostContext, Repl, ReplConfig, ReplThread};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let source = fs::read_to_string(&args.file)?;

    let config = match &args.config {
        Some(path) => serde_json::from_str::<ReplConfig>(&fs::read_to_string(path)?)?,
        None => python_config(),
    };

    let exe_dir = env::current_exe()?
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    let host = HostContext::capture(exe_dir);

    let mut repl = Repl::start(&config, &host)?;
    let prefix = config.prefix.clone();

    for line in source.lines() {
        println!("{line}");
        let input = format!("{line}\n");

        let started = Instant::now();
        let mut pending = ReplThread::start(repl, input)?;
        let mut announced = false;
        while !pending.is_finished() {
            if !announced && started.elapsed() > Duration::from_secs(1) {
                eprintln!("{prefix}(waiting for the REPL...)");
                announced = true;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let (next, result) = pending.join()?;
        repl = next;
        print!("{}", result);

        if result.is_eof() || result.is_timeout() {
            break;
        }
    }

    repl.close()?;
    Ok(())
}

fn python_config() -> ReplConfig {
    let mut config = ReplConfig::new("python3 -i -u", vec![">>> ".into(), r"\.\.\. ".into()]);
    config.prefix = "# > ".into();
    config.error = vec!["Traceback ".into(), "  File \"".into()];
    config.ignore = vec![r"^\s*$".into()];
    config.timeout = Some(10.0);
    config
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    file: PathBuf,
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut file = None;
        let mut config = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        config = Some(PathBuf::from(&args[i]));
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                other if file.is_none() => file = Some(PathBuf::from(other)),
                other => {
                    eprintln!("Unknown argument: {}", other);
                }
            }
            i += 1;
        }

        let Some(file) = file else {
            eprintln!("Error: a worksheet file is required");
            Self::print_help();
            std::process::exit(1);
        };

        Self { file, config }
    }

    fn print_help() {
        println!(
            r#"replbridge worksheet example

USAGE:
    cargo run --example worksheet -- <FILE> [OPTIONS]

OPTIONS:
    -c, --config <PATH>      JSON REPL configuration [default: python3]
    --help                   Print this help message
"#
        );
    }
}
