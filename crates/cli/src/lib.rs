pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "schemata",
    about = "Schemata operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations and validate JSON documents offline.",
    after_help = "Examples:\n  schemata doctor --json\n  schemata config\n  schemata validate --schema output.json --value reply.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending SQLite migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, storage connectivity and language model settings")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Check a JSON value against a schema without starting the server")]
    Validate {
        #[arg(long, help = "Path to the JSON schema document")]
        schema: PathBuf,
        #[arg(long, help = "Path to the JSON value to check")]
        value: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Validate { schema, value } => commands::validate::run(&schema, &value),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
