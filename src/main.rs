use bandtrader::cli::{run, Cli};
use bandtrader::logging::init_logging;
use clap::Parser;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);
    run(cli)
}
