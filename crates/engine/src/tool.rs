//! External tool invocation.
//!
//! Every external program the pipeline launches goes through a [`ToolRunner`]. The
//! production runner blocks until the process exits; tests substitute a recording
//! runner so no bioinformatics tooling is needed.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::ToolError;

/// Number of trailing stderr lines carried into error messages.
const STDERR_TAIL_LINES: usize = 20;

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Receives the command line plus captured stdout and stderr.
    pub log_file: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            log_file: None,
        }
    }

    /// Build from an argv list such as `["Rscript", "eda.R"]`. Returns `None` when empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Shell-like rendering for logs and checkpoint metadata.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| if part.contains(char::is_whitespace) { format!("'{part}'") } else { part.to_string() })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Execute external commands.
///
/// Implementations return `Err` for launch failures and non-zero exits so callers never
/// inspect exit codes themselves.
pub trait ToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError>;
}

impl<T: ToolRunner + ?Sized> ToolRunner for &T {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        (**self).run(invocation)
    }
}

/// Runs commands with [`std::process::Command`], blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessToolRunner;

impl ToolRunner for ProcessToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        info!(command = %invocation, "running tool");
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }
        command.envs(invocation.env.iter().map(|(key, value)| (key.as_str(), value.as_str())));

        let output = command.output().map_err(|source| ToolError::Launch {
            program: invocation.program.clone(),
            source,
        })?;
        let captured = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if let Some(log_file) = &invocation.log_file
            && let Err(error) = write_tool_log(log_file, invocation, &captured)
        {
            warn!(program = %invocation.program, error = %error, "could not write tool log");
        }

        if !output.status.success() {
            warn!(program = %invocation.program, status = %output.status, "tool exited unsuccessfully");
            return Err(ToolError::ExitStatus {
                program: invocation.program.clone(),
                status: output.status.to_string(),
                stderr_tail: stderr_tail(&captured.stderr),
            });
        }
        debug!(program = %invocation.program, stdout_bytes = captured.stdout.len(), "tool finished");
        Ok(captured)
    }
}

fn write_tool_log(path: &Path, invocation: &ToolInvocation, output: &ToolOutput) -> Result<(), ToolError> {
    let log_error = |source| ToolError::Log {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(log_error)?;
    }
    let body = format!(
        "$ {}\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
        invocation.command_line(),
        output.stdout.trim_end(),
        output.stderr.trim_end()
    );
    fs::write(path, body).map_err(log_error)
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.is_empty() { "no error output".to_string() } else { tail }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    /// Records invocations; programs listed in `failing` exit non-zero.
    #[derive(Default)]
    pub struct FakeToolRunner {
        pub calls: RefCell<Vec<ToolInvocation>>,
        failing: Vec<String>,
        stderr: HashMap<String, String>,
    }

    impl FakeToolRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(mut self, program: &str) -> Self {
            self.failing.push(program.to_string());
            self
        }

        pub fn with_stderr(mut self, program: &str, stderr: &str) -> Self {
            self.stderr.insert(program.to_string(), stderr.to_string());
            self
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|call| call.program.clone()).collect()
        }
    }

    impl ToolRunner for FakeToolRunner {
        fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
            self.calls.borrow_mut().push(invocation.clone());
            if self.failing.contains(&invocation.program) {
                return Err(ToolError::ExitStatus {
                    program: invocation.program.clone(),
                    status: "exit status: 1".into(),
                    stderr_tail: "simulated failure".into(),
                });
            }
            Ok(ToolOutput {
                stdout: String::new(),
                stderr: self.stderr.get(&invocation.program).cloned().unwrap_or_default(),
            })
        }
    }
}
