//! External process execution.
//!
//! The disk orchestrator talks to `diskpart`, `dism`, `bcdboot` and `bcdedit`
//! exclusively through [`ToolRunner`], so a simulated machine can stand in
//! for the real tools.

use std::path::Path;
use std::process::Command;

use serde::Serialize;
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

/// Captured result of one tool invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, for error reports.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Runs a program to completion and captures its output.
pub trait ToolRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[String]) -> VhdbranchResult<CommandOutput>;
}

/// [`ToolRunner`] backed by `std::process::Command`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String]) -> VhdbranchResult<CommandOutput> {
        let output = Command::new(program).args(args).output().map_err(|e| {
            VhdbranchError::CommandExecution {
                tool: program.display().to_string(),
                exit_code: None,
                summary: format!("failed to start: {e}"),
                output: String::new(),
            }
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
