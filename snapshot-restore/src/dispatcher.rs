//! Maps named actions from the confirmation page to external commands
//!
//! The dispatcher itself holds no state: each action is exactly one process
//! invocation, and the exit status decides the [`ActionOutcome`].

use snapshot_restore_common::format::summarize_output;
use snapshot_restore_common::{
    Action, ActionOutcome, CommandRunner, CommandSpec, RestoreConfig, cmdline,
};

/// Exit status pkexec uses when authorization is refused or dismissed
const PKEXEC_NOT_AUTHORIZED: i32 = 126;
/// Exit status pkexec uses when the target program cannot be run
const PKEXEC_NOT_FOUND: i32 = 127;

/// Something that can carry out page actions
pub trait ActionHandler: Send + Sync {
    fn dispatch(&self, action: Action) -> ActionOutcome;
}

pub struct Dispatcher<R> {
    runner: R,
    config: RestoreConfig,
}

impl<R: CommandRunner> Dispatcher<R> {
    pub fn new(runner: R, config: RestoreConfig) -> Self {
        Self { runner, config }
    }

    /// `pkexec <helper> restore --yes`
    pub fn restore_command(&self) -> CommandSpec {
        CommandSpec::new(&self.config.pkexec_bin)
            .arg(self.config.helper_path.to_string_lossy())
            .args(["restore", "--yes"])
    }

    pub fn reboot_command(&self) -> Option<CommandSpec> {
        CommandSpec::from_argv(&self.config.reboot_command)
    }

    /// Dispatch by name, rejecting anything that is not an [`Action`]
    pub fn dispatch_named(&self, name: &str) -> ActionOutcome {
        match Action::parse(name) {
            Some(action) => self.run_action(action),
            None => ActionOutcome::InvalidAction(name.to_string()),
        }
    }

    fn run_action(&self, action: Action) -> ActionOutcome {
        match action {
            Action::Restore => self.restore(),
            Action::Reboot => self.reboot(),
        }
    }

    fn restore(&self) -> ActionOutcome {
        let command = self.restore_command();
        log::info!("Requesting restore: {}", command.display());

        match self.runner.run(&command) {
            Ok(output) if output.success() => {
                let message = summarize_output(&output.stdout, 1);
                if message == cmdline::NOT_SNAPSHOT_BOOT {
                    // The helper saw a different command line than we did
                    log::warn!("Helper did not detect a snapshot boot");
                    return ActionOutcome::Failure(message);
                }
                ActionOutcome::Success(if message.is_empty() {
                    "Restoration completed successfully! Please reboot the system.".to_string()
                } else {
                    message
                })
            }
            Ok(output) => {
                let reason = match output.code {
                    Some(PKEXEC_NOT_AUTHORIZED) => "Authorization failed".to_string(),
                    Some(PKEXEC_NOT_FOUND) => format!(
                        "Could not run {}",
                        self.config.helper_path.display()
                    ),
                    // The helper logs to stderr too; its verdict is the last line
                    _ => match summarize_output(&output.stderr, 1) {
                        last if last.is_empty() => output.failure_reason(),
                        last => last,
                    },
                };
                log::warn!("Restore failed: {}", reason);
                ActionOutcome::Failure(reason)
            }
            Err(e) => ActionOutcome::Failure(format!("{:#}", e)),
        }
    }

    fn reboot(&self) -> ActionOutcome {
        let Some(command) = self.reboot_command() else {
            return ActionOutcome::Failure("No reboot command configured".to_string());
        };
        log::info!("Rebooting: {}", command.display());

        match self.runner.run(&command) {
            Ok(output) if output.success() => ActionOutcome::Success("Rebooting".to_string()),
            Ok(output) => ActionOutcome::Failure(format!(
                "Could not restart system: {}",
                output.failure_reason()
            )),
            Err(e) => ActionOutcome::Failure(format!("Could not restart system: {:#}", e)),
        }
    }
}

impl<R: CommandRunner + Send + Sync> ActionHandler for Dispatcher<R> {
    fn dispatch(&self, action: Action) -> ActionOutcome {
        self.run_action(action)
    }
}
