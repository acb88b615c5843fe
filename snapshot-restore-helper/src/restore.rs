// Scripted Timeshift restore of the booted snapshot

use snapshot_restore_common::cmdline;
use snapshot_restore_common::{CmdlineSource, CommandRunner, CommandSpec, RestoreConfig};

use crate::{audit, btrfs, grub};

/// Answers for any prompt timeshift shows despite `--scripted`
const PROMPT_ANSWERS: &str = "\n\n\n\n\n\n\n\n\n\n";

/// Result of a restore request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// `--yes` was not given, nothing was done
    ConfirmationRequired,
    /// The system is not running from a snapshot, nothing to restore
    NotSnapshotBoot,
    Restored { snapshot: String },
    Failed {
        snapshot: Option<String>,
        reason: String,
    },
}

impl RestoreOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RestoreOutcome::Failed { .. } => 1,
            _ => 0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RestoreOutcome::ConfirmationRequired => {
                "Restoring replaces the current system with the booted snapshot. \
                 Run again with --yes to confirm."
                    .to_string()
            }
            RestoreOutcome::NotSnapshotBoot => cmdline::NOT_SNAPSHOT_BOOT.to_string(),
            RestoreOutcome::Restored { snapshot } => format!(
                "Snapshot '{}' restored successfully. Please reboot the system.",
                snapshot
            ),
            RestoreOutcome::Failed { reason, .. } => format!("Restore failed: {}", reason),
        }
    }
}

/// Restores the snapshot named on the kernel command line
pub struct RestoreInvoker<'a, R: ?Sized, S: ?Sized> {
    runner: &'a R,
    cmdline: &'a S,
    config: &'a RestoreConfig,
}

impl<'a, R, S> RestoreInvoker<'a, R, S>
where
    R: CommandRunner + ?Sized,
    S: CmdlineSource + ?Sized,
{
    pub fn new(runner: &'a R, cmdline: &'a S, config: &'a RestoreConfig) -> Self {
        Self {
            runner,
            cmdline,
            config,
        }
    }

    /// Run the restore; without `confirmed` no external command is started
    pub fn run(&self, confirmed: bool) -> RestoreOutcome {
        if !confirmed {
            return RestoreOutcome::ConfirmationRequired;
        }

        let snapshot = match cmdline::detect(self.cmdline) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return RestoreOutcome::NotSnapshotBoot,
            Err(e) => {
                return RestoreOutcome::Failed {
                    snapshot: None,
                    reason: format!("{:#}", e),
                };
            }
        };

        let outcome = match self.restore(&snapshot.name) {
            Ok(()) => RestoreOutcome::Restored {
                snapshot: snapshot.name.clone(),
            },
            Err(reason) => RestoreOutcome::Failed {
                snapshot: Some(snapshot.name.clone()),
                reason,
            },
        };

        let error = match &outcome {
            RestoreOutcome::Failed { reason, .. } => Some(reason.as_str()),
            _ => None,
        };
        audit::log_snapshot_restore(&snapshot.name, error.is_none(), error);

        outcome
    }

    fn restore(&self, name: &str) -> Result<(), String> {
        match btrfs::root_subvolume_exists(self.runner, self.config) {
            Ok(exists) => log::info!("Root subvolume @ present before restore: {}", exists),
            Err(e) => log::warn!("Could not check root subvolume: {:#}", e),
        }

        self.stop_timeshift_gui();

        log::info!("Starting Timeshift restoration of {}", name);
        let command = CommandSpec::new(&self.config.timeshift_bin)
            .args(["--restore", "--snapshot", name, "--scripted", "--yes"])
            .stdin(PROMPT_ANSWERS);

        let output = self
            .runner
            .run(&command)
            .map_err(|e| format!("{:#}", e))?;

        if !output.success() {
            return Err(format!(
                "Timeshift restoration failed: {}",
                output.failure_reason()
            ));
        }
        log::info!("Timeshift restoration completed");

        if self.config.regenerate_grub {
            grub::regenerate_and_verify(self.runner, self.config).map_err(|e| {
                log::error!("{:#}", e);
                "GRUB configuration regeneration failed".to_string()
            })?;
        }

        Ok(())
    }

    /// The GUI holds Timeshift's lock; it must be gone before the scripted run
    fn stop_timeshift_gui(&self) {
        let command = CommandSpec::new("killall").arg(&self.config.timeshift_gui_process);
        match self.runner.run(&command) {
            // killall exits 1 when no process matched
            Ok(output) if output.success() => {
                log::info!("Stopped running {}", self.config.timeshift_gui_process)
            }
            Ok(_) => log::debug!("No {} running", self.config.timeshift_gui_process),
            Err(e) => log::warn!("Could not stop {}: {:#}", self.config.timeshift_gui_process, e),
        }
    }
}
