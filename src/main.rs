use std::process::ExitCode;

use clap::Parser;
use textbehind::cli::{self, CliArgs};

fn main() -> ExitCode {
    let args = CliArgs::parse();
    cli::run(args)
}
