use clap::Parser;
use std::process::ExitCode;

use indieflix::cli::{self, Cli};
use indieflix::tracing::{init_tracing, DEFAULT_FILTER};
use indieflix::util::env::init_env;

#[tokio::main]
async fn main() -> ExitCode {
    init_env();
    if let Err(e) = init_tracing(DEFAULT_FILTER) {
        eprintln!("{e}");
    }
    cli::run(Cli::parse()).await
}
