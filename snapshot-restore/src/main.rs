mod dispatcher;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use snapshot_restore_common::action::USAGE;
use snapshot_restore_common::{
    ActionOutcome, RestoreConfig, SnapshotRef, SystemRunner, cmdline, page,
};

use dispatcher::Dispatcher;
use server::Ui;

#[derive(Debug, Parser)]
#[command(
    name = "snapshot-restore",
    version,
    about = "Detect a Timeshift snapshot boot and offer to restore it"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report whether the system was booted from a snapshot
    Detect {
        /// Open the confirmation page when a snapshot boot is detected
        #[arg(long)]
        launch: bool,
    },
    /// Serve the confirmation page for the booted snapshot
    Ui,
    /// Run a page action: restore or reboot
    Action {
        /// Action name
        name: Option<String>,
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

fn detect(config: &RestoreConfig) -> Result<Option<SnapshotRef>> {
    cmdline::detect_from_path(&config.cmdline_path)
}

fn launch_ui(snapshot: SnapshotRef, config: RestoreConfig) -> Result<i32> {
    let bind = config.ui_bind.clone();
    let browser = config.browser_command.clone();
    let ui = Ui::new(snapshot, Dispatcher::new(SystemRunner, config));
    server::serve(ui, &bind, &browser)?;
    Ok(0)
}

/// Help and version requests succeed; every other parse error is a usage error
fn usage_exit_code(error: &clap::Error) -> i32 {
    if error.use_stderr() {
        1
    } else {
        0
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = RestoreConfig::load()?;

    match cli.command {
        Command::Detect { launch } => match detect(&config)? {
            Some(snapshot) => {
                println!("Booted from snapshot {}", snapshot.name);
                if launch {
                    launch_ui(snapshot, config)
                } else {
                    Ok(0)
                }
            }
            None => {
                println!("Not booted from a snapshot");
                Ok(0)
            }
        },
        Command::Ui => match detect(&config)? {
            Some(snapshot) => launch_ui(snapshot, config),
            None => {
                println!("{}", cmdline::NOT_SNAPSHOT_BOOT);
                Ok(0)
            }
        },
        Command::Action { name } => {
            let Some(name) = name else {
                eprintln!("{}", USAGE);
                return Ok(1);
            };

            let outcome = Dispatcher::new(SystemRunner, config).dispatch_named(&name);
            if let ActionOutcome::InvalidAction(_) = outcome {
                eprintln!("{}\n\n{}", outcome.message(), USAGE);
            } else {
                println!("{}", page::render_fragment(&outcome));
            }
            Ok(outcome.exit_code())
        }
    }
}
