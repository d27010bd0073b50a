//! Syndicated Bar Theater Kitchen (Brooklyn), via its Veezi sessions page.
//!
//! The "by film" tab lists each film once with one date container per day;
//! day headers look like "Friday 10, October" and carry no year.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

use super::{absolute_url, dated_showtime, element_text, ListingSource, PageFetcher};
use crate::model::{RawListing, Venue};
use crate::normalization::showtime::resolve_short_date;

pub const SOURCE_ID: &str = "syndicated_bk";
const TICKETING_BASE: &str = "https://ticketing.useast.veezi.com";
const SESSIONS_URL: &str =
    "https://ticketing.useast.veezi.com/sessions/?siteToken=dxdq5wzbef6bz2sjqt83ytzn1c";

// The element id is misspelled on the site.
static FILMS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div#sessionsByFilmConent div.film").expect("static selector")
});
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3.title").expect("static selector"));
static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p.film-desc").expect("static selector"));
static DATE_CONTAINER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.date-container").expect("static selector"));
static DATE_HEADER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h4.date").expect("static selector"));
static SESSION_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.session-times a").expect("static selector"));
static TIME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("time").expect("static selector"));

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("static regex"));
static DIRECTOR_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"[Dd]irected by\s+([^,.\n]+)").expect("static regex"),
        Regex::new(r"[Dd]irector[:\s]+([^,.\n]+)").expect("static regex"),
        Regex::new(r"[Dd]ir\.?\s+([^,.\n]+)").expect("static regex"),
    ]
});
static DIRECTOR_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(?:stars?|starring|features?|with)\b.*$").expect("static regex")
});

pub struct SyndicatedBkSource {
    venue: Venue,
    fetcher: PageFetcher,
}

impl SyndicatedBkSource {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self {
            venue: Venue {
                source_id: SOURCE_ID.into(),
                display_name: "Syndicated BK".into(),
                location: "40 Bogart St, Brooklyn, NY".into(),
                website: "http://syndicatedbk.com".into(),
            },
            fetcher,
        }
    }
}

#[async_trait]
impl ListingSource for SyndicatedBkSource {
    fn venue(&self) -> &Venue {
        &self.venue
    }

    async fn fetch(&self) -> Result<Vec<RawListing>> {
        let page = self.fetcher.get_html(SESSIONS_URL).await?;
        Ok(parse_sessions(&page, Utc::now().date_naive()))
    }
}

/// One listing per film per day. `today` anchors the year of the day headers.
pub fn parse_sessions(html: &str, today: NaiveDate) -> Vec<RawListing> {
    let doc = Html::parse_document(html);
    let mut out = Vec::new();

    for film in doc.select(&FILMS) {
        let Some(title) = film.select(&TITLE).next().map(element_text) else {
            continue;
        };
        if title.chars().count() < 2 {
            continue;
        }
        let description = film
            .select(&DESCRIPTION)
            .next()
            .map(element_text)
            .filter(|d| !d.is_empty());
        let (director, year) = description
            .as_deref()
            .map(parse_description)
            .unwrap_or((None, None));

        for container in film.select(&DATE_CONTAINER) {
            let Some(header) = container.select(&DATE_HEADER).next().map(element_text) else {
                continue;
            };
            let Some(date) = resolve_short_date(&header, today) else {
                debug!(source = SOURCE_ID, %title, %header, "unrecognized day header");
                continue;
            };

            let mut times = Vec::new();
            let mut film_link = None;
            for link in container.select(&SESSION_LINK) {
                if let Some(t) = link.select(&TIME).next().map(element_text) {
                    if !t.is_empty() {
                        times.push(t);
                    }
                }
                if film_link.is_none() {
                    film_link = link
                        .value()
                        .attr("href")
                        .and_then(|h| absolute_url(TICKETING_BASE, h));
                }
            }
            if times.is_empty() {
                continue;
            }

            out.push(RawListing {
                title: title.clone(),
                showtime: dated_showtime(date, &times),
                director: director.clone(),
                year,
                description: description.clone(),
                film_link,
            });
        }
    }
    out
}

/// Director and year mentioned in free-text film copy.
pub fn parse_description(text: &str) -> (Option<String>, Option<i32>) {
    let year = YEAR.find(text).and_then(|m| m.as_str().parse().ok());
    let director = DIRECTOR_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .map(|c| DIRECTOR_TAIL.replace(c[1].trim(), "").trim().to_string())
        .filter(|d| !d.is_empty());
    (director, year)
}
