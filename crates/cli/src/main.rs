use std::process::ExitCode;

fn main() -> ExitCode {
    haggler_cli::run()
}
