// Recording command runner for tests

use anyhow::{Result, bail};
use snapshot_restore_common::{CommandOutput, CommandRunner, CommandSpec};
use std::cell::RefCell;
use std::collections::HashMap;

/// Records every invocation and answers with canned outputs per program
#[derive(Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<CommandSpec>>,
    outputs: HashMap<String, CommandOutput>,
    missing: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `program` exit with `code` and print `stderr`
    pub fn exits(mut self, program: &str, code: i32, stderr: &str) -> Self {
        self.outputs.insert(
            program.to_string(),
            CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
        self
    }

    /// Make `program` print `stdout` and succeed
    pub fn prints(mut self, program: &str, stdout: &str) -> Self {
        self.outputs.insert(
            program.to_string(),
            CommandOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
        self
    }

    /// Make `program` impossible to start
    pub fn missing(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.program).collect()
    }

    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(command.clone());

        if self.missing.contains(&command.program) {
            bail!("Failed to run {}", command.program);
        }

        Ok(self
            .outputs
            .get(&command.program)
            .cloned()
            .unwrap_or(CommandOutput {
                code: Some(0),
                ..Default::default()
            }))
    }
}
