// snapshot-restore-helper - privileged side of snapshot-restore
// Invoked through pkexec by the dispatcher, or as root by package hooks

use anyhow::Result;
use clap::{Parser, Subcommand};
use snapshot_restore_common::{ProcCmdline, RestoreConfig, SystemRunner};

mod audit;
mod btrfs;
mod grub;
mod hooks;
mod restore;
#[cfg(test)]
mod test_support;

use hooks::Phase;
use restore::RestoreInvoker;

#[derive(Debug, Parser)]
#[command(
    name = "snapshot-restore-helper",
    version,
    about = "Restore the booted Timeshift snapshot and maintain its integration"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Make the booted snapshot the new system (requires --yes)
    Restore {
        /// Confirm the destructive restore
        #[arg(long)]
        yes: bool,
    },
    /// Run a package lifecycle hook
    Hook {
        #[arg(value_enum)]
        phase: Phase,
    },
    /// Apply configuration patches to cooperating packages
    Patch {
        /// Only report what would change
        #[arg(long)]
        check: bool,
    },
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(usage_exit_code(&e));
        }
    };

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Help and version requests succeed; every other parse error is a usage error
fn usage_exit_code(error: &clap::Error) -> i32 {
    if error.use_stderr() {
        1
    } else {
        0
    }
}

fn require_root(what: &str) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        anyhow::bail!("{} must be run as root (try pkexec)", what);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<i32> {
    let config = RestoreConfig::load()?;
    let runner = SystemRunner;

    match cli.command {
        Command::Restore { yes } => {
            if yes {
                require_root("restore")?;
            }

            let cmdline = ProcCmdline::new(&config.cmdline_path);
            let outcome = RestoreInvoker::new(&runner, &cmdline, &config).run(yes);

            match outcome.exit_code() {
                0 => println!("{}", outcome.message()),
                _ => eprintln!("{}", outcome.message()),
            }
            Ok(outcome.exit_code())
        }
        Command::Hook { phase } => {
            require_root("hook")?;

            log::info!("Running {:?} hook", phase);
            let report = hooks::run_hook(phase, &runner, &config);
            if report.failures() > 0 {
                log::warn!("{} hook step(s) failed, see above", report.failures());
            }
            Ok(0)
        }
        Command::Patch { check } => {
            if !check {
                require_root("patch")?;
            }

            let reports = hooks::apply_patches(&config, check);
            let mut flagged = 0;
            for report in &reports {
                match &report.outcome {
                    Ok(outcome) => println!("{}: {}", report.name, outcome.as_str()),
                    Err(e) => println!("{}: error: {:#}", report.name, e),
                }
                if report.is_flagged() {
                    flagged += 1;
                }
            }

            if flagged > 0 {
                eprintln!("{} patch(es) need attention", flagged);
                Ok(1)
            } else {
                Ok(0)
            }
        }
    }
}
