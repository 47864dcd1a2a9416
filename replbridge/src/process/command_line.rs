//! Command line splitting.

use std::iter;

use crate::error::StartError;

/// Split a command line with the current platform's rules.
pub fn split_command_line(line: &str) -> Result<Vec<String>, StartError> {
    if cfg!(windows) {
        split_windows(line)
    } else {
        split_posix(line)
    }
}

/// Split with POSIX shell word rules (quotes and backslash escapes).
pub fn split_posix(line: &str) -> Result<Vec<String>, StartError> {
    shell_words::split(line).map_err(|e| StartError::InvalidCommand {
        command: line.to_string(),
        message: e.to_string(),
    })
}

/// Split with the Microsoft C runtime rules.
///
/// - `2n` backslashes before `"` give `n` backslashes and toggle quoting.
/// - `2n+1` backslashes before `"` give `n` backslashes and a literal `"`.
/// - Backslashes anywhere else are literal.
/// - Spaces and tabs outside quotes separate arguments.
pub fn split_windows(line: &str) -> Result<Vec<String>, StartError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let mut count = 1;
                while chars.peek() == Some(&'\\') {
                    chars.next();
                    count += 1;
                }
                in_arg = true;
                if chars.peek() == Some(&'"') {
                    current.extend(iter::repeat_n('\\', count / 2));
                    if count % 2 == 1 {
                        chars.next();
                        current.push('"');
                    }
                } else {
                    current.extend(iter::repeat_n('\\', count));
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                in_arg = true;
            }
            ' ' | '\t' if !in_quotes => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            _ => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if in_quotes {
        return Err(StartError::InvalidCommand {
            command: line.to_string(),
            message: "unterminated quote".to_string(),
        });
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}
