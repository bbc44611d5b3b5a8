pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "stocky",
    about = "Supply-chain planning agent CLI",
    long_about = "Chat with the planning agent and operate its database: demo seeding, schema setup, config inspection, and readiness checks.",
    after_help = "Examples:\n  stocky chat --trace\n  stocky seed --start 2024-07-01 --days 30\n  stocky doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive chat session with the planning agent")]
    Chat {
        #[arg(long, help = "Resume this session id instead of starting a new session")]
        session: Option<String>,
        #[arg(long, help = "Print routing, protocol, and tool events as they happen")]
        trace: bool,
    },
    #[command(about = "Create the database schema if it is not already present")]
    Migrate,
    #[command(about = "Populate the database with synthetic demand and production records")]
    Seed {
        #[arg(long, help = "First day of the generated series (YYYY-MM-DD, defaults to today)")]
        start: Option<String>,
        #[arg(long, help = "Number of consecutive days to generate")]
        days: Option<u32>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, completion API readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat { session, trace } => return commands::chat::run(session, trace),
        Command::Migrate => commands::migrate::run(),
        Command::Seed { start, days } => commands::seed::run(start, days),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
