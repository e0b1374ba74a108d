use std::process::ExitCode;

fn main() -> ExitCode {
    branchline_cli::run()
}
