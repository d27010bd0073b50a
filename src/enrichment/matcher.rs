//! Candidate selection for one record.
//!
//! Only exact (case/whitespace-insensitive) title matches are acceptable.
//! Among those, a release year within one of the record's year wins, and a
//! matching director in the provider's crew credits breaks remaining ties.
use tracing::{debug, info};

use super::tmdb::{Candidate, MetadataProvider};
use crate::error::ProviderError;
use crate::model::CanonicalRecord;
use crate::normalization::title::{names_match, TitleKey};

/// Allowed distance between the listed year and the release year.
pub const YEAR_TOLERANCE: i32 = 1;
/// Credit lookups spent on a director tie-break.
pub const MAX_CREDIT_LOOKUPS: usize = 3;

fn title_matches(candidate: &Candidate, key: &TitleKey) -> bool {
    TitleKey::new(&candidate.title) == *key
        || candidate
            .original_title
            .as_deref()
            .is_some_and(|t| TitleKey::new(t) == *key)
}

fn year_distance(candidate: &Candidate, year: i32) -> Option<i32> {
    candidate.year().map(|y| (y - year).abs())
}

/// Rank candidates without any network calls: title filter, then year preference.
///
/// Returns the surviving candidates in preference order; the director
/// tie-break only applies when more than one survives.
pub fn shortlist(candidates: &[Candidate], title: &str, year: Option<i32>) -> Vec<Candidate> {
    let key = TitleKey::new(title);
    if key.is_empty() {
        return Vec::new();
    }
    let mut matched: Vec<Candidate> = candidates
        .iter()
        .filter(|c| title_matches(c, &key))
        .cloned()
        .collect();

    if let Some(year) = year {
        let near: Vec<Candidate> = matched
            .iter()
            .filter(|c| year_distance(c, year).is_some_and(|d| d <= YEAR_TOLERANCE))
            .cloned()
            .collect();
        if !near.is_empty() {
            matched = near;
        }
        // Exact year first; stable sort keeps provider order otherwise.
        matched.sort_by_key(|c| year_distance(c, year).unwrap_or(i32::MAX));
    }
    matched
}

/// Pick the best candidate for `record`, or `Ok(None)` when nothing acceptable exists.
pub async fn find_match<P>(
    provider: &P,
    record: &CanonicalRecord,
) -> Result<Option<Candidate>, ProviderError>
where
    P: MetadataProvider + ?Sized,
{
    let candidates = provider.search(&record.title, None).await?;
    let shortlist = shortlist(&candidates, &record.title, record.year);
    if shortlist.is_empty() {
        info!(title = %record.title, hits = candidates.len(), "no catalog match");
        return Ok(None);
    }
    if shortlist.len() == 1 {
        return Ok(shortlist.into_iter().next());
    }

    if let Some(director) = record.director.as_deref() {
        for candidate in shortlist.iter().take(MAX_CREDIT_LOOKUPS) {
            let credits = provider.credits(candidate.id).await?;
            if credits.directors().any(|d| names_match(d, director)) {
                debug!(title = %record.title, tmdb_id = candidate.id, %director, "director tie-break");
                return Ok(Some(candidate.clone()));
            }
        }
    }
    Ok(shortlist.into_iter().next())
}
