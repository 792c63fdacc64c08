pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use leaveflow_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "leaveflow",
    about = "Leaveflow operator CLI",
    long_about = "Operate the leave workflow store: migrations, demo data, config inspection, \
                  readiness checks and upcoming-leave reminders.",
    after_help = "Examples:\n  leaveflow doctor --json\n  leaveflow seed\n  \
                  leaveflow reminders --days 3"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a leaveflow.toml file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo departments, employees and leave types, then verify them")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, migration state and leave types")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Notify employees whose approved leave starts soon")]
    Reminders {
        #[arg(long, help = "Look-ahead window in days (defaults to workflow.reminder_days)")]
        days: Option<u32>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions { config_path: cli.config, ..LoadOptions::default() };

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Seed => commands::seed::run(options),
        Command::Config => commands::config::run(options),
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Reminders { days } => commands::reminders::run(options, days),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
