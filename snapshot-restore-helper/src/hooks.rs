// Package lifecycle hooks: services, config patches and GRUB

use anyhow::Result;
use snapshot_restore_common::{
    CommandRunner, CommandSpec, OperationResult, PatchOutcome, RestoreConfig,
};

use crate::{audit, grub};

/// Package manager transaction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Phase {
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRemove,
}

/// Result of every step a hook ran
#[derive(Debug, Default)]
pub struct HookReport {
    pub steps: Vec<(String, OperationResult)>,
}

impl HookReport {
    fn record(&mut self, step: impl Into<String>, result: OperationResult) {
        let step = step.into();
        if result.success {
            log::info!("{}: {}", step, result.message);
        } else {
            log::warn!("{}: {}", step, result.message);
        }
        self.steps.push((step, result));
    }

    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|(_, r)| !r.success).count()
    }
}

/// Outcome of one patch rule
#[derive(Debug)]
pub struct PatchReport {
    pub name: String,
    pub outcome: Result<PatchOutcome>,
}

impl PatchReport {
    pub fn is_flagged(&self) -> bool {
        match &self.outcome {
            Ok(outcome) => outcome.is_flagged(),
            Err(_) => true,
        }
    }
}

/// Apply (or with `dry_run`, only evaluate) every configured patch
pub fn apply_patches(config: &RestoreConfig, dry_run: bool) -> Vec<PatchReport> {
    config
        .patches
        .iter()
        .map(|rule| {
            let outcome = rule.apply(dry_run);
            if !dry_run {
                let (success, details) = match &outcome {
                    Ok(o) => (!o.is_flagged(), o.as_str().to_string()),
                    Err(e) => (false, format!("{:#}", e)),
                };
                audit::log_config_change(
                    &rule.file.to_string_lossy(),
                    success,
                    Some(&details),
                );
            }
            PatchReport {
                name: rule.name.clone(),
                outcome,
            }
        })
        .collect()
}

fn systemctl<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &RestoreConfig,
    args: &[&str],
) -> OperationResult {
    let command = CommandSpec::new(&config.systemctl_bin).args(args.iter().copied());
    match runner.run(&command) {
        Ok(output) if output.success() => OperationResult::success("ok"),
        Ok(output) => OperationResult::error(output.failure_reason()),
        Err(e) => OperationResult::error(format!("{:#}", e)),
    }
}

/// Run the hook for `phase`
///
/// Individual steps never abort the hook; failures are logged and returned
/// in the report so package transactions are not blocked.
pub fn run_hook<R: CommandRunner + ?Sized>(
    phase: Phase,
    runner: &R,
    config: &RestoreConfig,
) -> HookReport {
    let mut report = HookReport::default();
    let watcher = config.watcher_service.as_str();
    let detect = config.detect_unit.as_str();

    match phase {
        Phase::PreUpgrade => {
            report.record(
                format!("stop {}", watcher),
                systemctl(runner, config, &["stop", watcher]),
            );
        }
        Phase::PostInstall | Phase::PostUpgrade => {
            for patch in apply_patches(config, false) {
                let result = match &patch.outcome {
                    Ok(o) if !o.is_flagged() => OperationResult::success(o.as_str()),
                    Ok(o) => OperationResult::error(o.as_str()),
                    Err(e) => OperationResult::error(format!("{:#}", e)),
                };
                report.record(format!("patch {}", patch.name), result);
            }

            report.record(
                "daemon-reload",
                systemctl(runner, config, &["daemon-reload"]),
            );
            report.record(
                format!("enable {}", watcher),
                systemctl(runner, config, &["enable", "--now", watcher]),
            );

            if phase == Phase::PostInstall {
                report.record(
                    format!("enable {} for all users", detect),
                    systemctl(runner, config, &["--global", "enable", detect]),
                );
            }

            let grub = match grub::regenerate(runner, config) {
                Ok(()) => OperationResult::success("ok"),
                Err(e) => OperationResult::error(format!("{:#}", e)),
            };
            report.record("grub-mkconfig", grub);
        }
        Phase::PreRemove => {
            report.record(
                format!("disable {} for all users", detect),
                systemctl(runner, config, &["--global", "disable", detect]),
            );
        }
    }

    report
}
