use std::process::ExitCode;

fn main() -> ExitCode {
    schemata_cli::run()
}
