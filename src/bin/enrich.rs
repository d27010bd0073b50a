//! Scheduler entry point: `enrich [all | recent:H | stale:D] [limit]`.
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use indieflix::cli::{connect_store, fatal, run_enrich};
use indieflix::enrichment::Selection;
use indieflix::tracing::{init_tracing, DEFAULT_FILTER};
use indieflix::util::env::init_env;

fn parse_args() -> Result<(Selection, Option<i64>)> {
    let mut args = std::env::args().skip(1);
    let selection = match args.next() {
        Some(raw) => raw.parse::<Selection>().map_err(|e| anyhow!(e))?,
        None => Selection::All,
    };
    let limit = args
        .next()
        .map(|raw| raw.parse::<i64>().map_err(|e| anyhow!("invalid limit `{raw}`: {e}")))
        .transpose()?;
    Ok((selection, limit))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_env();
    if let Err(e) = init_tracing(DEFAULT_FILTER) {
        eprintln!("{e}");
    }
    let (selection, limit) = match parse_args() {
        Ok(parsed) => parsed,
        Err(err) => return fatal(&err),
    };
    let store = match connect_store(None).await {
        Ok(store) => store,
        Err(err) => return fatal(&err),
    };
    match run_enrich(&store, selection, limit).await {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => fatal(&err),
    }
}
