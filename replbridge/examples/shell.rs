//! Basic example: drive an interactive shell
//!
//! Starts `sh -i` with a fixed prompt and runs a few commands through it.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example shell
//! cargo run --example shell -- --shell bash --timeout 5 -- 'echo $BASH_VERSION'
//! ```

use std::env;
use std::time::Duration;

use replbridge::{HostContext, ReplBuilder};

const PROMPT: &str = "repl> ";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let host = HostContext::capture(env::current_dir()?);

    println!("Starting {} -i...", args.shell);

    let mut repl = ReplBuilder::new(format!("{} -i", args.shell))
        .prompt(PROMPT)
        .prefix("| ")
        .error("not found")
        .ignore(r"^\s*$")
        .env("PS1", PROMPT)
        .env("PS2", "")
        .timeout(Duration::from_secs(args.timeout))
        .start(&host)?;

    println!("Started process {}", repl.pid());
    if !repl.banner().is_empty() {
        println!("Banner:\n{}", repl.banner());
    }

    let inputs: Vec<String> = if args.commands.is_empty() {
        ["pwd", "echo $((6 * 7))", "no-such-command", "uname -s"]
            .iter()
            .map(|c| format!("{c}\n"))
            .collect()
    } else {
        args.commands.iter().map(|c| format!("{c}\n")).collect()
    };

    for input in &inputs {
        println!("\nExecuting: {}", input.trim_end());
        println!("{}", "-".repeat(50));
        let result = repl.correspond(input)?;
        print!("{}", result);
        println!("{}", "-".repeat(50));

        if result.is_timeout() {
            eprintln!("Timed out after {:?}", result.elapsed());
        } else if result.is_error() {
            eprintln!("Command failed");
        } else {
            println!("Completed in {:?}", result.elapsed());
        }
        if result.is_eof() {
            eprintln!("Shell exited");
            break;
        }
    }

    println!("\nClosing...");
    repl.close()?;
    println!("Done!");

    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    shell: String,
    timeout: u64,
    commands: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut shell = "sh".to_string();
        let mut timeout = 10u64;
        let mut commands = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--shell" | "-s" => {
                    i += 1;
                    if i < args.len() {
                        shell = args[i].clone();
                    }
                }
                "--timeout" | "-t" => {
                    i += 1;
                    if i < args.len() {
                        timeout = args[i].parse().unwrap_or(10);
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                "--" => {
                    commands.extend(args[i + 1..].iter().cloned());
                    break;
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self {
            shell,
            timeout,
            commands,
        }
    }

    fn print_help() {
        println!(
            r#"replbridge shell example

USAGE:
    cargo run --example shell -- [OPTIONS] [-- COMMAND...]

OPTIONS:
    -s, --shell <SHELL>      Shell to start [default: sh]
    -t, --timeout <SECS>     Seconds to wait for each prompt [default: 10]
    --help                   Print this help message

EXAMPLES:
    # Run the built-in demo commands
    cargo run --example shell

    # Run your own commands
    cargo run --example shell -- -- 'ls -la' 'whoami'
"#
        );
    }
}
