//! Ingestion run: every registered source, in order, exactly once.
//!
//! Each source moves `Pending -> Running -> {Succeeded | Empty | Failed}`;
//! the run is `Done` once the last source settles. A source failure is
//! recorded and the next source still runs. Only store failures and a held
//! ingest lock abort the run.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::canonical::{canonicalize, capture_timestamp};
use crate::database_ops::Store;
use crate::error::PipelineError;
use crate::sources::ListingSource;

/// Terminal state of one source within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceOutcome {
    Succeeded {
        listings: usize,
        inserted: usize,
        /// Dedup-key conflicts absorbed by the store.
        absorbed: usize,
        /// Listings dropped before the store (blank title).
        skipped: usize,
        /// Stored with a showtime the grammar could not parse.
        unparsed: usize,
    },
    /// The source answered with zero listings. Not an error.
    Empty,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub captured_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// The run completed but at least one source failed.
    PartialFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub sources: Vec<SourceReport>,
    pub total_listings: usize,
    pub total_inserted: usize,
    pub status: RunStatus,
}

impl RunSummary {
    fn from_reports(sources: Vec<SourceReport>) -> Self {
        let mut total_listings = 0;
        let mut total_inserted = 0;
        let mut status = RunStatus::Success;
        for report in &sources {
            match &report.outcome {
                SourceOutcome::Succeeded {
                    listings, inserted, ..
                } => {
                    total_listings += listings;
                    total_inserted += inserted;
                }
                SourceOutcome::Empty => {}
                SourceOutcome::Failed { .. } => status = RunStatus::PartialFailure,
            }
        }
        Self {
            sources,
            total_listings,
            total_inserted,
            status,
        }
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|r| matches!(r.outcome, SourceOutcome::Failed { .. }))
            .map(|r| r.source_id.as_str())
            .collect()
    }

    pub fn outcome_of(&self, source_id: &str) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|r| r.source_id == source_id)
            .map(|r| &r.outcome)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Run every source once, stamping each source's listings with the time its fetch began.
pub async fn ingest_all_sources<S, St>(sources: &[S], store: &St) -> Result<RunSummary, PipelineError>
where
    S: ListingSource,
    St: Store + ?Sized,
{
    run(sources, store, None).await
}

/// Same as `ingest_all_sources`, with one fixed capture timestamp for every source.
pub async fn ingest_at<S, St>(
    sources: &[S],
    store: &St,
    captured_at: DateTime<Utc>,
) -> Result<RunSummary, PipelineError>
where
    S: ListingSource,
    St: Store + ?Sized,
{
    run(sources, store, Some(captured_at)).await
}

#[instrument(skip_all, fields(sources = sources.len()))]
async fn run<S, St>(
    sources: &[S],
    store: &St,
    captured_at: Option<DateTime<Utc>>,
) -> Result<RunSummary, PipelineError>
where
    S: ListingSource,
    St: Store + ?Sized,
{
    if !store.try_lock_ingest().await? {
        return Err(PipelineError::IngestLocked);
    }
    let result = run_locked(sources, store, captured_at).await;
    if let Err(err) = store.unlock_ingest().await {
        warn!(error = %err, "releasing ingest lock failed");
    }
    result
}

async fn run_locked<S, St>(
    sources: &[S],
    store: &St,
    captured_at: Option<DateTime<Utc>>,
) -> Result<RunSummary, PipelineError>
where
    S: ListingSource,
    St: Store + ?Sized,
{
    let run_start = Instant::now();
    let mut reports = Vec::with_capacity(sources.len());

    for source in sources {
        let id = source.id().to_string();
        let at = capture_timestamp(captured_at.unwrap_or_else(Utc::now));
        let started = Instant::now();
        info!(source = %id, action = "start", "ingesting source");

        let outcome = match source.fetch().await {
            Err(err) => {
                let message = format!("{err:#}");
                error!(source = %id, error = %message, "source failed");
                SourceOutcome::Failed { error: message }
            }
            Ok(listings) if listings.is_empty() => {
                info!(source = %id, "source returned no listings");
                SourceOutcome::Empty
            }
            Ok(listings) => {
                let venue = source.venue();
                let records: Vec<_> = listings
                    .iter()
                    .filter_map(|raw| canonicalize(raw, venue, at))
                    .collect();
                let skipped = listings.len() - records.len();
                let unparsed = records.iter().filter(|r| !r.showtime().is_parsed()).count();
                // Store failures are fatal for the whole run.
                let written = store.upsert_batch(&records).await?;
                SourceOutcome::Succeeded {
                    listings: listings.len(),
                    inserted: written.inserted,
                    absorbed: written.absorbed,
                    skipped,
                    unparsed,
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let SourceOutcome::Succeeded {
            listings,
            inserted,
            absorbed,
            ..
        } = &outcome
        {
            info!(source = %id, listings, inserted, absorbed, elapsed_ms, action = "done", "source ingested");
        }
        reports.push(SourceReport {
            source_id: id,
            captured_at: at,
            elapsed_ms,
            outcome,
        });
    }

    let summary = RunSummary::from_reports(reports);
    let total_ms = run_start.elapsed().as_millis() as u64;
    match summary.status {
        RunStatus::Success => info!(
            total = summary.total_listings,
            inserted = summary.total_inserted,
            total_ms,
            "ingestion complete"
        ),
        RunStatus::PartialFailure => warn!(
            total = summary.total_listings,
            inserted = summary.total_inserted,
            failed = ?summary.failed_sources(),
            total_ms,
            "ingestion completed with failed sources"
        ),
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::MemoryStore;
    use crate::database_ops::{RecordFilter, StoreStats};
    use crate::model::{CanonicalRecord, Enrichment, RawListing, Venue};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct StubSource {
        venue: Venue,
        listings: Result<Vec<RawListing>, String>,
    }

    impl StubSource {
        fn ok(id: &str, titles: &[&str]) -> Self {
            Self {
                venue: venue(id),
                listings: Ok(titles
                    .iter()
                    .map(|t| RawListing::new(*t, "2025-01-05 (7:00 PM)"))
                    .collect()),
            }
        }

        fn failing(id: &str) -> Self {
            Self {
                venue: venue(id),
                listings: Err("connection reset".into()),
            }
        }
    }

    fn venue(id: &str) -> Venue {
        Venue {
            source_id: id.into(),
            display_name: id.to_uppercase(),
            location: String::new(),
            website: String::new(),
        }
    }

    #[async_trait]
    impl ListingSource for StubSource {
        fn venue(&self) -> &Venue {
            &self.venue
        }

        async fn fetch(&self) -> Result<Vec<RawListing>> {
            self.listings.clone().map_err(|e| anyhow!(e))
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 5, 9, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn reingesting_same_capture_is_idempotent() {
        let store = MemoryStore::new();
        let sources = vec![StubSource::ok("metrograph", &["Anora", "Nosferatu"])];

        let first = ingest_at(&sources, &store, at()).await.unwrap();
        assert_eq!(first.total_inserted, 2);
        assert_eq!(store.len(), 2);

        let second = ingest_at(&sources, &store, at()).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(second.total_inserted, 0);
        assert!(matches!(
            second.outcome_of("metrograph"),
            Some(SourceOutcome::Succeeded { absorbed: 2, .. })
        ));
    }

    #[tokio::test]
    async fn failing_source_does_not_block_its_neighbours() {
        let store = MemoryStore::new();
        let sources = vec![
            StubSource::ok("a", &["Anora"]),
            StubSource::failing("b"),
            StubSource::ok("c", &["The Brutalist", "Perfect Days"]),
        ];

        let summary = ingest_at(&sources, &store, at()).await.unwrap();
        assert_eq!(summary.status, RunStatus::PartialFailure);
        assert_eq!(summary.failed_sources(), vec!["b"]);
        assert!(matches!(summary.outcome_of("a"), Some(SourceOutcome::Succeeded { inserted: 1, .. })));
        assert!(matches!(summary.outcome_of("c"), Some(SourceOutcome::Succeeded { inserted: 2, .. })));
        match summary.outcome_of("b") {
            Some(SourceOutcome::Failed { error }) => assert!(error.contains("connection reset")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(summary.total_listings, 3);
        assert_eq!(store.len(), 3);
        // Lock released after the run.
        assert!(store.try_lock_ingest().await.unwrap());
    }

    #[tokio::test]
    async fn empty_source_is_reported_distinctly() {
        let store = MemoryStore::new();
        let sources = vec![StubSource::ok("a", &[]), StubSource::ok("b", &["Anora"])];
        let summary = ingest_at(&sources, &store, at()).await.unwrap();
        assert_eq!(summary.status, RunStatus::Success);
        assert_eq!(summary.outcome_of("a"), Some(&SourceOutcome::Empty));
    }

    #[tokio::test]
    async fn blank_titles_are_skipped_and_unparsed_showtimes_kept() {
        let store = MemoryStore::new();
        let sources = vec![StubSource {
            venue: venue("fixture"),
            listings: Ok(vec![
                RawListing::new("  ", "Now Playing"),
                RawListing::new("Perfect Days", "Check website for showtimes"),
            ]),
        }];
        let summary = ingest_at(&sources, &store, at()).await.unwrap();
        assert_eq!(
            summary.outcome_of("fixture"),
            Some(&SourceOutcome::Succeeded {
                listings: 2,
                inserted: 1,
                absorbed: 0,
                skipped: 1,
                unparsed: 1,
            })
        );
        let stored = store.get(1).unwrap();
        assert_eq!(stored.showtime_text, "Check website for showtimes");
        assert_eq!(stored.captured_at, at());
    }

    #[tokio::test]
    async fn held_lock_aborts_before_any_source_runs() {
        let store = MemoryStore::new();
        assert!(store.try_lock_ingest().await.unwrap());
        let sources = vec![StubSource::ok("a", &["Anora"])];
        let err = ingest_all_sources(&sources, &store).await.unwrap_err();
        assert!(matches!(err, PipelineError::IngestLocked));
        assert!(store.is_empty());
    }

    /// Store whose writes always fail; locking works.
    struct BrokenStore(MemoryStore);

    #[async_trait]
    impl Store for BrokenStore {
        async fn upsert(&self, _record: &CanonicalRecord) -> Result<bool> {
            Err(anyhow!("connection refused"))
        }
        async fn select(&self, filter: &RecordFilter) -> Result<Vec<CanonicalRecord>> {
            self.0.select(filter).await
        }
        async fn update_enrichment(&self, id: i64, enrichment: &Enrichment) -> Result<bool> {
            self.0.update_enrichment(id, enrichment).await
        }
        async fn stats(&self) -> Result<StoreStats> {
            self.0.stats().await
        }
        async fn try_lock_ingest(&self) -> Result<bool> {
            self.0.try_lock_ingest().await
        }
        async fn unlock_ingest(&self) -> Result<()> {
            self.0.unlock_ingest().await
        }
    }

    #[tokio::test]
    async fn store_failure_is_fatal_and_releases_lock() {
        let store = BrokenStore(MemoryStore::new());
        let sources = vec![StubSource::ok("a", &["Anora"]), StubSource::ok("b", &["Anora"])];
        let err = ingest_at(&sources, &store, at()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(_)));
        assert!(store.try_lock_ingest().await.unwrap());
    }
}
