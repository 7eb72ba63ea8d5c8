use std::process::ExitCode;

fn main() -> ExitCode {
    kunly_cli::run()
}
