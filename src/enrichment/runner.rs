//! Enrichment batches: select records, match each one, write metadata back.
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use super::matcher::find_match;
use super::rate_limit::RequestBudget;
use super::tmdb::{image_url, Candidate, Credits, MetadataProvider, MovieDetails, TmdbConfig};
use crate::database_ops::{RecordFilter, Store};
use crate::error::{PipelineError, ProviderError};
use crate::model::{CanonicalRecord, Enrichment};

/// Which records a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Every record without enrichment.
    All,
    /// Unenriched records captured within the last `hours`.
    Recent { hours: i64 },
    /// Records enriched more than `days` ago.
    Stale { days: i64 },
}

/// Widest accepted `recent` window.
pub const MAX_RECENT_HOURS: i64 = 24 * 365 * 10;
/// Widest accepted `stale` threshold.
pub const MAX_STALE_DAYS: i64 = 365 * 100;

impl Selection {
    pub fn recent(hours: i64) -> Result<Self, String> {
        if (1..=MAX_RECENT_HOURS).contains(&hours) {
            Ok(Selection::Recent { hours })
        } else {
            Err(format!("recent window must be 1..={MAX_RECENT_HOURS} hours, got {hours}"))
        }
    }

    pub fn stale(days: i64) -> Result<Self, String> {
        if (1..=MAX_STALE_DAYS).contains(&days) {
            Ok(Selection::Stale { days })
        } else {
            Err(format!("stale threshold must be 1..={MAX_STALE_DAYS} days, got {days}"))
        }
    }

    /// Store filter for this selection, evaluated at `now`.
    ///
    /// A window reaching past the representable range selects as if unbounded:
    /// `recent` loses its cutoff and `stale` matches nothing.
    pub fn filter(&self, now: DateTime<Utc>, limit: Option<i64>) -> RecordFilter {
        let filter = match *self {
            Selection::All => RecordFilter::new().unenriched(),
            Selection::Recent { hours } => {
                let filter = RecordFilter::new().unenriched();
                match TimeDelta::try_hours(hours).and_then(|d| now.checked_sub_signed(d)) {
                    Some(since) => filter.captured_since(since),
                    None => filter,
                }
            }
            Selection::Stale { days } => {
                let cutoff = TimeDelta::try_days(days)
                    .and_then(|d| now.checked_sub_signed(d))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                RecordFilter::new().enriched_before(cutoff)
            }
        };
        filter.limit(limit)
    }
}

impl FromStr for Selection {
    type Err = String;

    /// `all`, `recent:<hours>` or `stale:<days>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let (mode, arg) = match s.split_once(':') {
            Some((m, a)) => (m, Some(a)),
            None => (s.as_str(), None),
        };
        let number = |arg: Option<&str>| -> Result<i64, String> {
            arg.ok_or_else(|| format!("`{mode}` needs a number, e.g. `{mode}:24`"))?
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("invalid {mode} window in `{s}`"))
        };
        match mode {
            "all" if arg.is_none() => Ok(Selection::All),
            "recent" => Selection::recent(number(arg)?),
            "stale" => Selection::stale(number(arg)?),
            _ => Err(format!("unknown selection `{s}` (expected all | recent:H | stale:D)")),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => f.write_str("all"),
            Selection::Recent { hours } => write!(f, "recent:{hours}"),
            Selection::Stale { days } => write!(f, "stale:{days}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub selected: usize,
    pub enriched: usize,
    pub skipped_no_match: usize,
    pub failed: usize,
}

impl EnrichmentSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Retry settings for throttled provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Timeout | ProviderError::Transport(_) => true,
        ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
        ProviderError::Decode(_) => false,
    }
}

/// Provider wrapper that spends one budget grant per attempt and backs off on
/// throttling and server errors.
pub struct Throttled<'a, P: ?Sized> {
    inner: &'a P,
    budget: &'a RequestBudget,
    retry: RetryPolicy,
}

impl<'a, P: MetadataProvider + ?Sized> Throttled<'a, P> {
    pub fn new(inner: &'a P, budget: &'a RequestBudget, retry: RetryPolicy) -> Self {
        Self {
            inner,
            budget,
            retry,
        }
    }

    async fn call<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        loop {
            self.budget.acquire().await;
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) if attempt < self.retry.max_retries && is_retryable(&err) => {
                    let wait = self.retry.backoff * (attempt + 1);
                    warn!(error = %err, attempt, wait_ms = wait.as_millis() as u64, "provider call failed; backing off");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<P: MetadataProvider + ?Sized> MetadataProvider for Throttled<'_, P> {
    async fn search(&self, title: &str, year: Option<i32>) -> Result<Vec<Candidate>, ProviderError> {
        self.call(|| self.inner.search(title, year)).await
    }

    async fn details(&self, id: i64) -> Result<MovieDetails, ProviderError> {
        self.call(|| self.inner.details(id)).await
    }

    async fn credits(&self, id: i64) -> Result<Credits, ProviderError> {
        self.call(|| self.inner.credits(id)).await
    }
}

/// How fetched metadata is shaped into an `Enrichment`.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub image_base_url: String,
    pub poster_size: String,
    pub backdrop_size: String,
    pub max_cast: usize,
    pub retry: RetryPolicy,
}

impl EnrichOptions {
    pub fn from_tmdb(cfg: &TmdbConfig) -> Self {
        Self {
            image_base_url: cfg.image_base_url.clone(),
            poster_size: cfg.poster_size.clone(),
            backdrop_size: cfg.backdrop_size.clone(),
            max_cast: cfg.max_cast,
            retry: RetryPolicy::default(),
        }
    }
}

fn join_non_empty<'a>(items: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = items
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    (!joined.is_empty()).then_some(joined)
}

/// Assemble the complete enrichment value from fetched metadata.
pub fn build_enrichment(
    details: &MovieDetails,
    credits: &Credits,
    opts: &EnrichOptions,
    enriched_at: DateTime<Utc>,
) -> Enrichment {
    let base = opts.image_base_url.as_str();
    Enrichment {
        tmdb_id: details.id,
        poster_url: image_url(base, &opts.poster_size, details.poster_path.as_deref()),
        backdrop_url: image_url(base, &opts.backdrop_size, details.backdrop_path.as_deref()),
        runtime_minutes: details.runtime.filter(|m| *m > 0),
        rating: details.vote_average,
        genres: join_non_empty(details.genres.iter().map(|g| g.name.as_str())),
        cast_members: join_non_empty(credits.top_cast(opts.max_cast).into_iter()),
        overview: details
            .overview
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string),
        enriched_at,
    }
}

enum RecordResult {
    Enriched,
    NoMatch,
    /// The row was gone when the write landed.
    Missing,
}

/// Drives one enrichment batch against a store and a (budgeted) provider.
pub struct EnrichmentRunner<'a, P: ?Sized> {
    provider: &'a P,
    budget: RequestBudget,
    opts: EnrichOptions,
}

impl<'a, P: MetadataProvider + ?Sized> EnrichmentRunner<'a, P> {
    pub fn new(provider: &'a P, budget: RequestBudget, opts: EnrichOptions) -> Self {
        Self {
            provider,
            budget,
            opts,
        }
    }

    pub fn budget(&self) -> &RequestBudget {
        &self.budget
    }

    /// Enrich the records named by `selection`.
    ///
    /// Provider failures are counted per record; store failures abort the batch.
    /// Dropping the returned future between records leaves no partial writes.
    #[instrument(skip(self, store, selection), fields(selection = %selection))]
    pub async fn enrich<St: Store + ?Sized>(
        &self,
        store: &St,
        selection: Selection,
        limit: Option<i64>,
    ) -> Result<EnrichmentSummary, PipelineError> {
        let started = Instant::now();
        let records = store.select(&selection.filter(Utc::now(), limit)).await?;
        let mut summary = EnrichmentSummary {
            selected: records.len(),
            ..Default::default()
        };
        info!(selected = records.len(), "enrichment batch starting");

        let provider = Throttled::new(self.provider, &self.budget, self.opts.retry);
        for (idx, record) in records.iter().enumerate() {
            let Some(id) = record.id else {
                continue;
            };
            match self.enrich_one(&provider, store, id, record).await {
                Ok(RecordResult::Enriched) => summary.enriched += 1,
                Ok(RecordResult::NoMatch) => summary.skipped_no_match += 1,
                Ok(RecordResult::Missing) => summary.failed += 1,
                Err(RecordError::Provider(err)) => {
                    warn!(id, title = %record.title, error = %err, "enrichment lookup failed");
                    summary.failed += 1;
                }
                Err(RecordError::Store(err)) => return Err(PipelineError::Store(err)),
            }
            if (idx + 1) % 25 == 0 {
                info!(done = idx + 1, total = records.len(), "enrichment progress");
            }
        }

        info!(
            enriched = summary.enriched,
            skipped_no_match = summary.skipped_no_match,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "enrichment batch complete"
        );
        Ok(summary)
    }

    async fn enrich_one<St: Store + ?Sized>(
        &self,
        provider: &Throttled<'_, P>,
        store: &St,
        id: i64,
        record: &CanonicalRecord,
    ) -> Result<RecordResult, RecordError> {
        let Some(candidate) = find_match(provider, record).await? else {
            return Ok(RecordResult::NoMatch);
        };
        // Everything is fetched before the single write, so a failure here
        // leaves the record exactly as it was.
        let (details, credits) = futures::try_join!(
            provider.details(candidate.id),
            provider.credits(candidate.id)
        )?;
        let enrichment = build_enrichment(&details, &credits, &self.opts, Utc::now());
        let updated = store
            .update_enrichment(id, &enrichment)
            .await
            .map_err(RecordError::Store)?;
        if !updated {
            warn!(id, title = %record.title, "record vanished before enrichment write");
            return Ok(RecordResult::Missing);
        }
        info!(id, title = %record.title, tmdb_id = enrichment.tmdb_id, "record enriched");
        Ok(RecordResult::Enriched)
    }
}

enum RecordError {
    Provider(ProviderError),
    Store(anyhow::Error),
}

impl From<ProviderError> for RecordError {
    fn from(err: ProviderError) -> Self {
        RecordError::Provider(err)
    }
}
