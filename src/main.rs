use clap::Parser;

use logship::cli::Cli;
use logship::config::Config;
use logship::platform::{ExitCode, SafeStderr};
use logship::runner;

fn main() {
    let cli = Cli::parse();
    let mut stderr = SafeStderr::new();

    let config = match Config::build(cli) {
        Ok(config) => config,
        Err(fatal) => {
            let _ = stderr.writeln(&fatal.diagnostic());
            ExitCode::GeneralError.exit();
        }
    };

    match runner::run(config) {
        Ok(_summary) => {
            // The summary (and, before it, the periodic progress lines) was already
            // written to stdout or the `--output` file by `runner::run`.
            ExitCode::Success.exit();
        }
        Err(fatal) => {
            let _ = stderr.writeln(&fatal.diagnostic());
            ExitCode::GeneralError.exit();
        }
    }
}
