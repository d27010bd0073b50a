//! `indieflix` admin CLI: ingestion, enrichment, the daily pipeline and
//! database housekeeping. The scheduler binaries reuse the same runners.
pub mod stats;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::database_ops::memory::MemoryStore;
use crate::database_ops::postgres::PgStore;
use crate::database_ops::Store;
use crate::enrichment::{
    EnrichOptions, EnrichmentRunner, EnrichmentSummary, RequestBudget, Selection, TmdbClient,
    TmdbConfig,
};
use crate::error::PipelineError;
use crate::orchestrator::{ingest_all_sources, RunSummary};
use crate::sources::{build_sources, PipelineConfig};
use crate::util::db::Db;
use crate::util::env as env_util;

/// Settings logged (redacted) before an ingestion run.
const INGEST_ENV: &[&str] = &[
    "DATABASE_URL",
    "DB_HOST",
    "SOURCES",
    "FIXTURE_FILE",
    "SCRAPER_TIMEOUT_SECS",
    "SCRAPER_DELAY_MS",
];

/// Settings logged (redacted) before an enrichment batch.
const ENRICH_ENV: &[&str] = &[
    "DATABASE_URL",
    "TMDB_API_KEY",
    "TMDB_BASE_URL",
    "TMDB_REQUESTS_PER_WINDOW",
    "TMDB_WINDOW_SECS",
];

/// Batch size used by `daily`.
pub const DAILY_ENRICH_LIMIT: i64 = 100;

#[derive(Parser, Debug)]
#[command(name = "indieflix", version, about = "Independent cinema showtime pipeline")]
pub struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    pub db_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// Scrape every configured source once and store new listings
    Ingest(IngestArgs),
    /// Attach TMDB metadata to stored listings
    Enrich(EnrichArgs),
    /// Ingest, then enrich up to 100 unenriched listings
    Daily,
    /// Create the listings table, indexes and trigger if missing
    InitDb,
    /// Print listing counts and the last capture time
    Stats(stats::StatsArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct IngestArgs {
    /// Restrict the run to these source ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,
    /// Parse and canonicalize without writing to the database
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Default, Clone)]
#[command(group(ArgGroup::new("selection").args(["all", "recent", "stale"])))]
pub struct EnrichArgs {
    /// Every listing without metadata (default)
    #[arg(long, default_value_t = false)]
    pub all: bool,
    /// Unenriched listings captured in the last N hours
    #[arg(long, value_name = "HOURS")]
    pub recent: Option<i64>,
    /// Listings whose metadata is older than N days
    #[arg(long, value_name = "DAYS")]
    pub stale: Option<i64>,
    /// Maximum number of listings to process
    #[arg(long)]
    pub limit: Option<i64>,
}

impl EnrichArgs {
    pub fn selection(&self) -> Result<Selection> {
        let selection = match (self.recent, self.stale) {
            (Some(hours), _) => Selection::recent(hours),
            (_, Some(days)) => Selection::stale(days),
            _ => Ok(Selection::All),
        };
        selection.map_err(anyhow::Error::msg)
    }
}

/// How a finished command maps onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    PartialFailure,
}

impl Outcome {
    pub fn combine(self, other: Outcome) -> Outcome {
        if self == Outcome::Success && other == Outcome::Success {
            Outcome::Success
        } else {
            Outcome::PartialFailure
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::PartialFailure => ExitCode::from(1),
        }
    }
}

impl From<&RunSummary> for Outcome {
    fn from(summary: &RunSummary) -> Self {
        if summary.is_success() {
            Outcome::Success
        } else {
            Outcome::PartialFailure
        }
    }
}

impl From<&EnrichmentSummary> for Outcome {
    fn from(summary: &EnrichmentSummary) -> Self {
        if summary.is_success() {
            Outcome::Success
        } else {
            Outcome::PartialFailure
        }
    }
}

/// Exit status 2 for anything that stopped a command outright.
pub fn fatal(err: &anyhow::Error) -> ExitCode {
    let message = format!("{err:#}");
    error!(error = %message, "fatal");
    ExitCode::from(2)
}

/// Run a parsed CLI invocation to completion.
pub async fn run(cli: Cli) -> ExitCode {
    match dispatch(cli).await {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => fatal(&err),
    }
}

async fn dispatch(cli: Cli) -> Result<Outcome> {
    let db_url = cli.db_url;
    match cli.command {
        Command::Ingest(args) if args.dry_run => {
            let store = MemoryStore::new();
            let outcome = run_ingest(&store, &args).await?;
            info!(records = store.len(), "dry run complete; nothing written");
            Ok(outcome)
        }
        Command::Ingest(args) => {
            let store = connect_store(db_url.as_deref()).await?;
            run_ingest(&store, &args).await
        }
        Command::Enrich(args) => {
            let selection = args.selection()?;
            let store = connect_store(db_url.as_deref()).await?;
            run_enrich(&store, selection, args.limit).await
        }
        Command::Daily => {
            let store = connect_store(db_url.as_deref()).await?;
            run_daily(&store).await
        }
        Command::InitDb => {
            let db = connect_db(db_url.as_deref()).await?;
            db.ensure_schema().await?;
            info!("schema ready");
            Ok(Outcome::Success)
        }
        Command::Stats(args) => {
            let store = connect_store(db_url.as_deref()).await?;
            stats::run(&store, &args).await?;
            Ok(Outcome::Success)
        }
    }
}

pub async fn connect_db(db_url: Option<&str>) -> Result<Db> {
    env_util::init_env();
    let url = match db_url {
        Some(url) => url.to_string(),
        None => env_util::db_url()?,
    };
    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 5u32).max(1);
    let db = Db::connect(&url, max_conns).await?;
    db.ping().await?;
    Ok(db)
}

pub async fn connect_store(db_url: Option<&str>) -> Result<PgStore> {
    Ok(PgStore::new(connect_db(db_url).await?))
}

/// One ingestion pass over the configured sources.
pub async fn run_ingest<St: Store + ?Sized>(store: &St, args: &IngestArgs) -> Result<Outcome> {
    env_util::preflight_check("ingest", &[], INGEST_ENV)?;
    let mut cfg = PipelineConfig::from_env();
    if !args.only.is_empty() {
        cfg.sources = args.only.clone();
    }
    let sources = build_sources(&cfg)?;
    let start = Instant::now();
    info!(sources = sources.len(), "action=ingest_start");

    let summary = ingest_all_sources(&sources, store).await.map_err(pipeline_error)?;
    info!(
        listings = summary.total_listings,
        inserted = summary.total_inserted,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "action=ingest_done"
    );
    if !summary.is_success() {
        warn!(failed = ?summary.failed_sources(), "ingestion finished with failed sources");
    }
    print_json(&summary)?;
    Ok(Outcome::from(&summary))
}

/// One enrichment batch. Ctrl-C stops it between records.
pub async fn run_enrich<St: Store + ?Sized>(
    store: &St,
    selection: Selection,
    limit: Option<i64>,
) -> Result<Outcome> {
    env_util::preflight_check("enrich", &["TMDB_API_KEY"], ENRICH_ENV)?;
    let cfg = TmdbConfig::from_env().context("enrichment needs TMDB_API_KEY")?;
    let budget = RequestBudget::new(cfg.requests_per_window, cfg.window);
    let opts = EnrichOptions::from_tmdb(&cfg);
    let client = TmdbClient::new(cfg)?;
    let runner = EnrichmentRunner::new(&client, budget, opts);

    let start = Instant::now();
    info!(%selection, ?limit, "action=enrich_start");
    let summary = tokio::select! {
        res = runner.enrich(store, selection, limit) => res.map_err(pipeline_error)?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; stopping enrichment batch");
            return Ok(Outcome::PartialFailure);
        }
    };
    info!(
        enriched = summary.enriched,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "action=enrich_done"
    );
    print_json(&summary)?;
    Ok(Outcome::from(&summary))
}

/// Ingest, then enrich a bounded batch of unenriched records.
///
/// A failed enrichment step after a successful ingest still counts as partial
/// failure rather than fatal, so the ingest result is never masked.
pub async fn run_daily<St: Store + ?Sized>(store: &St) -> Result<Outcome> {
    let ingest = run_ingest(store, &IngestArgs::default()).await?;
    let enrich = match run_enrich(store, Selection::All, Some(DAILY_ENRICH_LIMIT)).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let message = format!("{err:#}");
            error!(error = %message, "daily enrichment step failed");
            Outcome::PartialFailure
        }
    };
    Ok(ingest.combine(enrich))
}

fn pipeline_error(err: PipelineError) -> anyhow::Error {
    match err {
        PipelineError::Store(inner) => inner.context("store failure"),
        other => anyhow::Error::new(other),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enrich_selection_flags() {
        let cli = Cli::try_parse_from(["indieflix", "enrich", "--recent", "24", "--limit", "10"]).unwrap();
        let Command::Enrich(args) = cli.command else {
            panic!("expected enrich");
        };
        assert_eq!(args.selection().unwrap(), Selection::Recent { hours: 24 });
        assert_eq!(args.limit, Some(10));

        let cli = Cli::try_parse_from(["indieflix", "enrich"]).unwrap();
        let Command::Enrich(args) = cli.command else {
            panic!("expected enrich");
        };
        assert_eq!(args.selection().unwrap(), Selection::All);
    }

    #[test]
    fn selection_flags_are_exclusive() {
        assert!(Cli::try_parse_from(["indieflix", "enrich", "--all", "--stale", "30"]).is_err());
        let cli = Cli::try_parse_from(["indieflix", "enrich", "--stale", "0"]).unwrap();
        let Command::Enrich(args) = cli.command else {
            panic!("expected enrich");
        };
        assert!(args.selection().is_err());

        let cli = Cli::try_parse_from(["indieflix", "enrich", "--stale", "1000000000"]).unwrap();
        let Command::Enrich(args) = cli.command else {
            panic!("expected enrich");
        };
        assert!(args.selection().is_err());
    }

    #[test]
    fn kebab_case_subcommands() {
        assert!(matches!(
            Cli::try_parse_from(["indieflix", "init-db"]).unwrap().command,
            Command::InitDb
        ));
        let cli = Cli::try_parse_from(["indieflix", "ingest", "--only", "metrograph,ifc_center", "--dry-run"])
            .unwrap();
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.only, vec!["metrograph", "ifc_center"]);
        assert!(args.dry_run);
    }

    #[test]
    fn outcomes_combine_to_exit_codes() {
        assert_eq!(Outcome::Success.combine(Outcome::Success), Outcome::Success);
        assert_eq!(Outcome::Success.combine(Outcome::PartialFailure), Outcome::PartialFailure);
        assert_eq!(
            Outcome::from(&EnrichmentSummary {
                selected: 3,
                enriched: 2,
                skipped_no_match: 0,
                failed: 1,
            }),
            Outcome::PartialFailure
        );
    }
}
