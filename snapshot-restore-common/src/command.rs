//! External command execution
//!
//! Every interaction with timeshift, grub-mkconfig, systemctl, pkexec and
//! friends goes through [`CommandRunner`], so the flows built on top of it can
//! be exercised against a recording fake.

use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Text written to the child's stdin, which is closed afterwards
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Build from an argv-style list; `None` if it is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the child was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Best available explanation for a failure
    pub fn failure_reason(&self) -> String {
        let stderr = crate::format::summarize_output(&self.stderr, 3);
        if !stderr.is_empty() {
            return stderr;
        }
        let stdout = crate::format::summarize_output(&self.stdout, 3);
        if !stdout.is_empty() {
            return stdout;
        }
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs external programs to completion
///
/// `Err` means the program could not be started at all; a program that ran
/// and failed is reported through [`CommandOutput::code`].
pub trait CommandRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        (**self).run(command)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        (**self).run(command)
    }
}

/// Runs programs with `std::process`, blocking until they exit
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        log::debug!("Running: {}", command.display());

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", command.program))?;

        if let (Some(input), Some(mut pipe)) = (&command.stdin, child.stdin.take()) {
            // The child may exit without reading everything
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                log::debug!("{} closed stdin early: {}", command.program, e);
            }
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for {}", command.program))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
