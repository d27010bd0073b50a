//! Scheduler entry point: one ingestion pass over every configured source.
use std::process::ExitCode;

use indieflix::cli::{connect_store, fatal, run_ingest, IngestArgs};
use indieflix::tracing::{init_tracing, DEFAULT_FILTER};
use indieflix::util::env::init_env;

#[tokio::main]
async fn main() -> ExitCode {
    init_env();
    if let Err(e) = init_tracing(DEFAULT_FILTER) {
        eprintln!("{e}");
    }
    let store = match connect_store(None).await {
        Ok(store) => store,
        Err(err) => return fatal(&err),
    };
    match run_ingest(&store, &IngestArgs::default()).await {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => fatal(&err),
    }
}
