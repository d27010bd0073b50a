use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One listing entry as an adapter saw it. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub title: String,
    /// Free-text showtime/date string exactly as scraped.
    pub showtime: String,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub film_link: Option<String>,
}

impl RawListing {
    pub fn new(title: impl Into<String>, showtime: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            showtime: showtime.into(),
            director: None,
            year: None,
            description: None,
            film_link: None,
        }
    }
}

/// Static facts about a venue; every listing from a source inherits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub source_id: String,
    pub display_name: String,
    pub location: String,
    pub website: String,
}

/// Third-party metadata attached by the enrichment runner.
///
/// Kept as a single value so a record is either fully enriched or not
/// enriched at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub tmdb_id: i64,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub runtime_minutes: Option<i32>,
    pub rating: Option<f64>,
    /// Comma-joined genre names.
    pub genres: Option<String>,
    /// Comma-joined top-billed cast.
    pub cast_members: Option<String>,
    pub overview: Option<String>,
    pub enriched_at: DateTime<Utc>,
}

/// The persisted unit: one showing at one source, as captured by one scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Store-assigned id; `None` until inserted.
    pub id: Option<i64>,
    pub title: String,
    pub source_id: String,
    pub source_display_name: String,
    pub location: String,
    pub website: String,
    pub film_link: Option<String>,
    pub director: Option<String>,
    pub year: Option<i32>,
    pub showtime_text: String,
    pub description: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub enrichment: Option<Enrichment>,
}

/// Natural identity of a record: at most one row per (title, source, scrape).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub title: String,
    pub source_id: String,
    pub captured_at: DateTime<Utc>,
}

impl CanonicalRecord {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            title: self.title.clone(),
            source_id: self.source_id.clone(),
            captured_at: self.captured_at,
        }
    }

    pub fn enriched_at(&self) -> Option<DateTime<Utc>> {
        self.enrichment.as_ref().map(|e| e.enriched_at)
    }

    pub fn is_enriched(&self) -> bool {
        self.enrichment.is_some()
    }

    pub fn showtime(&self) -> crate::normalization::showtime::Showtime {
        crate::normalization::showtime::Showtime::parse(&self.showtime_text)
    }
}

/// Render a runtime in minutes the way listings display it: `1h 39m`, `2h`, `45m`.
pub fn format_runtime(minutes: i32) -> Option<String> {
    if minutes <= 0 {
        return None;
    }
    let hours = minutes / 60;
    let mins = minutes % 60;
    Some(match (hours, mins) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    })
}
