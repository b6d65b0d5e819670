//! Process Launching
//!
//! Synchronous child-process execution for `[Run]` entries and removal
//! scripts. There is no timeout: a command that never exits stalls its caller.

use crate::error::CapabilityError;
use std::path::Path;
use std::process::Command;

/// Process-run capability used by the engine and the uninstaller
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion and return its exit code
    fn run(&self, program: &Path, arguments: &str, working_dir: &Path) -> Result<i32, CapabilityError>;
}

/// Runs commands with [`std::process::Command`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &Path, arguments: &str, working_dir: &Path) -> Result<i32, CapabilityError> {
        let mut command = Command::new(program);
        command.args(split_arguments(arguments));
        if working_dir.is_dir() {
            command.current_dir(working_dir);
        }

        let status = command.status()?;
        // Killed by a signal: no exit code.
        Ok(status.code().unwrap_or(-1))
    }
}

/// Split an argument string on whitespace; `"..."` groups words
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in arguments.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if has_token {
        args.push(current);
    }

    args
}
