pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kunly",
    about = "Kunly operator CLI",
    long_about = "Inspect configuration, check Slack readiness, and post the startup notice on demand.",
    after_help = "Examples:\n  kunly doctor --json\n  kunly config\n  kunly notify --text \"deploy finished\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and check Slack token readiness with auth.test")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Post the startup notice once and report the message timestamp")]
    Notify {
        #[arg(long, help = "Override the primary message text")]
        text: Option<String>,
    },
}

pub fn run() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Notify { text } => commands::notify::run(text),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
