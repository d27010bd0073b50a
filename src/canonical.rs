use chrono::{DateTime, SubsecRound, Utc};

use crate::model::{CanonicalRecord, RawListing, Venue};
use crate::normalization::showtime::Showtime;

/// Earliest release year accepted from scraped metadata.
const MIN_PLAUSIBLE_YEAR: i32 = 1870;
const MAX_PLAUSIBLE_YEAR: i32 = 2100;

/// Truncate a capture timestamp to the precision the store keeps (microseconds),
/// so in-memory and persisted dedup keys compare equal.
pub fn capture_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Collapse internal whitespace and trim.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_opt(raw: Option<&str>) -> Option<String> {
    raw.map(clean_text).filter(|s| !s.is_empty())
}

/// Normalize one raw listing into a record ready for `Store::upsert`.
///
/// Returns `None` only when the title is blank; unparseable showtimes are
/// kept verbatim.
pub fn canonicalize(
    raw: &RawListing,
    venue: &Venue,
    captured_at: DateTime<Utc>,
) -> Option<CanonicalRecord> {
    let title = clean_text(&raw.title);
    if title.is_empty() {
        return None;
    }
    let captured_at = capture_timestamp(captured_at);
    let showtime = Showtime::parse_with_reference(&clean_text(&raw.showtime), captured_at.date_naive());

    Some(CanonicalRecord {
        id: None,
        title,
        source_id: venue.source_id.clone(),
        source_display_name: venue.display_name.clone(),
        location: venue.location.clone(),
        website: venue.website.clone(),
        film_link: clean_opt(raw.film_link.as_deref()),
        director: clean_opt(raw.director.as_deref()),
        year: raw
            .year
            .filter(|y| (MIN_PLAUSIBLE_YEAR..=MAX_PLAUSIBLE_YEAR).contains(y)),
        showtime_text: showtime.normalized(),
        description: clean_opt(raw.description.as_deref()),
        captured_at,
        created_at: captured_at,
        updated_at: captured_at,
        enrichment: None,
    })
}
