use std::process::ExitCode;

fn main() -> ExitCode {
    eivs_cli::run()
}
