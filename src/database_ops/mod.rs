//! Persistence for canonical records.
//!
//! `Store` is the contract the orchestrator and the enrichment runner write
//! against; `postgres::PgStore` is the production backend and
//! `memory::MemoryStore` backs dry runs and tests.
pub mod memory;
pub mod postgres;
pub mod schema;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{CanonicalRecord, Enrichment};
use crate::normalization::title::TitleKey;

/// Enrichment condition applied by a `RecordFilter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrichmentState {
    #[default]
    Any,
    /// `enriched_at IS NULL`
    Unenriched,
    /// `enriched_at < cutoff`
    EnrichedBefore(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrder {
    /// Newest capture first.
    #[default]
    CapturedDesc,
    /// Oldest enrichment first (re-enrichment batches).
    EnrichedAsc,
}

/// Immutable selection parameters for `Store::select`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub source_id: Option<String>,
    pub enrichment: EnrichmentState,
    pub captured_since: Option<DateTime<Utc>>,
    pub title_contains: Option<String>,
    pub order: RecordOrder,
    pub limit: Option<i64>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn unenriched(mut self) -> Self {
        self.enrichment = EnrichmentState::Unenriched;
        self
    }

    pub fn enriched_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.enrichment = EnrichmentState::EnrichedBefore(cutoff);
        self.order = RecordOrder::EnrichedAsc;
        self
    }

    pub fn captured_since(mut self, since: DateTime<Utc>) -> Self {
        self.captured_since = Some(since);
        self
    }

    pub fn title_contains(mut self, needle: impl Into<String>) -> Self {
        self.title_contains = Some(needle.into());
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit.filter(|n| *n > 0);
        self
    }

    /// Evaluate the filter against one record (same semantics as the SQL backend).
    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        if let Some(source) = &self.source_id {
            if &record.source_id != source {
                return false;
            }
        }
        match self.enrichment {
            EnrichmentState::Any => {}
            EnrichmentState::Unenriched if record.is_enriched() => return false,
            EnrichmentState::Unenriched => {}
            EnrichmentState::EnrichedBefore(cutoff) => match record.enriched_at() {
                Some(at) if at < cutoff => {}
                _ => return false,
            },
        }
        if let Some(since) = self.captured_since {
            if record.captured_at < since {
                return false;
            }
        }
        if let Some(needle) = &self.title_contains {
            let needle = TitleKey::new(needle);
            if !TitleKey::new(&record.title).as_str().contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Result of writing a batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    /// Rows whose dedup key already existed.
    pub absorbed: usize,
}

impl UpsertOutcome {
    pub fn record(&mut self, inserted: bool) {
        if inserted {
            self.inserted += 1;
        } else {
            self.absorbed += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_records: i64,
    /// Records captured within one day of the latest capture.
    pub current_records: i64,
    pub enriched_records: i64,
    pub last_capture: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a record; a dedup-key conflict is absorbed and reported as `false`.
    async fn upsert(&self, record: &CanonicalRecord) -> Result<bool>;

    async fn upsert_batch(&self, records: &[CanonicalRecord]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        for record in records {
            outcome.record(self.upsert(record).await?);
        }
        Ok(outcome)
    }

    async fn select(&self, filter: &RecordFilter) -> Result<Vec<CanonicalRecord>>;

    /// Write every enrichment field plus `enriched_at` in one step.
    /// Returns `false` when no record has this id.
    async fn update_enrichment(&self, id: i64, enrichment: &Enrichment) -> Result<bool>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Take the run-scoped ingestion marker. `false` if someone else holds it.
    async fn try_lock_ingest(&self) -> Result<bool>;

    async fn unlock_ingest(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(title: &str, source: &str, captured_at: DateTime<Utc>) -> CanonicalRecord {
        CanonicalRecord {
            id: Some(1),
            title: title.into(),
            source_id: source.into(),
            source_display_name: source.into(),
            location: String::new(),
            website: String::new(),
            film_link: None,
            director: None,
            year: None,
            showtime_text: "ongoing".into(),
            description: None,
            captured_at,
            created_at: captured_at,
            updated_at: captured_at,
            enrichment: None,
        }
    }

    fn enrichment(at: DateTime<Utc>) -> Enrichment {
        Enrichment {
            tmdb_id: 1,
            poster_url: None,
            backdrop_url: None,
            runtime_minutes: None,
            rating: None,
            genres: None,
            cast_members: None,
            overview: None,
            enriched_at: at,
        }
    }

    #[test]
    fn filter_by_source_and_title() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let rec = record("The Brutalist", "ifc_center", now);
        assert!(RecordFilter::new().matches(&rec));
        assert!(RecordFilter::new().source("ifc_center").matches(&rec));
        assert!(!RecordFilter::new().source("metrograph").matches(&rec));
        assert!(RecordFilter::new().title_contains("BRUTAL").matches(&rec));
        assert!(!RecordFilter::new().title_contains("Anora").matches(&rec));
    }

    #[test]
    fn filter_by_enrichment_state_and_recency() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let mut rec = record("Anora", "metrograph", now - Duration::hours(30));

        assert!(RecordFilter::new().unenriched().matches(&rec));
        assert!(!RecordFilter::new().captured_since(now - Duration::hours(24)).matches(&rec));
        assert!(!RecordFilter::new().enriched_before(now).matches(&rec));

        rec.enrichment = Some(enrichment(now - Duration::days(40)));
        assert!(!RecordFilter::new().unenriched().matches(&rec));
        assert!(RecordFilter::new().enriched_before(now - Duration::days(30)).matches(&rec));
        assert!(!RecordFilter::new().enriched_before(now - Duration::days(50)).matches(&rec));
    }

    #[test]
    fn non_positive_limit_means_unbounded() {
        assert_eq!(RecordFilter::new().limit(Some(0)).limit, None);
        assert_eq!(RecordFilter::new().limit(Some(5)).limit, Some(5));
    }
}
