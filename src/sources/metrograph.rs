//! Metrograph (NYC). The landing page carries a day selector; each scheduled
//! day has its own page listing film cards with a metadata line like
//! "Directed by Coralie Fargeat, 2024, 35mm".
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::{info, warn};

use super::{absolute_url, element_text, has_class, ListingSource, PageFetcher};
use crate::model::{RawListing, Venue};

pub const SOURCE_ID: &str = "metrograph";
const BASE_URL: &str = "https://metrograph.com";
const SCHEDULE_URL: &str = "https://metrograph.com/nyc/";
const MAX_TIMES_PER_DAY: usize = 3;

static DAY_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.day-selector-day").expect("static selector"));
static DAY_SECTION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div[id^='calendar-list-day-']").expect("static selector")
});
static FILM_CARD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.film-thumbnail").expect("static selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.title").expect("static selector"));
static METADATA: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.film-metadata").expect("static selector"));
static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.film-description").expect("static selector"));
static TIMES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.showtimes a").expect("static selector"));

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("static regex"));
static DIRECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Directed by|Dir\.?|By)\s+([^,\d]+)").expect("static regex")
});

pub struct MetrographSource {
    venue: Venue,
    fetcher: PageFetcher,
}

impl MetrographSource {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self {
            venue: Venue {
                source_id: SOURCE_ID.into(),
                display_name: "Metrograph".into(),
                location: "7 Ludlow Street, NYC".into(),
                website: BASE_URL.into(),
            },
            fetcher,
        }
    }
}

#[async_trait]
impl ListingSource for MetrographSource {
    fn venue(&self) -> &Venue {
        &self.venue
    }

    async fn fetch(&self) -> Result<Vec<RawListing>> {
        let landing = self.fetcher.get_html(SCHEDULE_URL).await?;
        let dates = parse_available_dates(&landing);
        info!(source = SOURCE_ID, days = dates.len(), "scheduled days found");

        let mut listings = Vec::new();
        for (i, date) in dates.iter().enumerate() {
            if i > 0 {
                self.fetcher.pause().await;
            }
            let url = format!("{SCHEDULE_URL}?date={date}");
            // One missing day should not throw away the rest of the schedule.
            match self.fetcher.get_html(&url).await {
                Ok(page) => listings.extend(parse_day(&page, date)),
                Err(err) => warn!(source = SOURCE_ID, %date, error = %err, "day page failed"),
            }
        }
        Ok(listings)
    }
}

/// Dates (`YYYY-MM-DD`) that have showings, skipping closed and unscheduled days.
pub fn parse_available_dates(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&DAY_LINK)
        .filter(|a| !has_class(*a, "closed") && !has_class(*a, "unscheduled"))
        .filter_map(|a| a.value().attr("data-vars-ga-label"))
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Film cards of one day page.
pub fn parse_day(html: &str, date: &str) -> Vec<RawListing> {
    let doc = Html::parse_document(html);
    let section_id = format!("calendar-list-day-{date}");
    let Some(section) = doc
        .select(&DAY_SECTION)
        .find(|s| s.value().id() == Some(section_id.as_str()))
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for card in section.select(&FILM_CARD) {
        let Some(title_el) = card.select(&TITLE).next() else {
            continue;
        };
        let title = element_text(title_el);
        if title.chars().count() < 2 {
            continue;
        }
        let metadata = card.select(&METADATA).next().map(element_text);
        let (director, year) = metadata
            .as_deref()
            .map(parse_metadata)
            .unwrap_or((None, None));
        let times: Vec<String> = card
            .select(&TIMES)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .take(MAX_TIMES_PER_DAY)
            .collect();

        out.push(RawListing {
            title,
            showtime: if times.is_empty() {
                date.to_string()
            } else {
                format!("{date} ({})", times.join(", "))
            },
            director,
            year,
            description: card
                .select(&DESCRIPTION)
                .next()
                .map(element_text)
                .filter(|d| !d.is_empty()),
            film_link: title_el
                .value()
                .attr("href")
                .and_then(|h| absolute_url(BASE_URL, h)),
        });
    }
    out
}

/// Director and year from a line like "Directed by Coralie Fargeat, 2024, 35mm".
pub fn parse_metadata(text: &str) -> (Option<String>, Option<i32>) {
    let year = YEAR.find(text).and_then(|m| m.as_str().parse().ok());
    let director = DIRECTOR
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|d| !d.is_empty());
    (director, year)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANDING: &str = r#"
        <div class="day-selector">
          <a class="day-selector-day closed" data-vars-ga-label="2025-10-06">Mon</a>
          <a class="day-selector-day" data-vars-ga-label="2025-10-07">Tue</a>
          <a class="day-selector-day unscheduled" data-vars-ga-label="2025-10-08">Wed</a>
          <a class="day-selector-day" data-vars-ga-label="2025-10-09">Thu</a>
        </div>"#;

    const DAY: &str = r#"
        <div id="calendar-list-day-2025-10-06"><div class="film-thumbnail">
          <a class="title" href="/film/?vista_film_id=9999">Wrong Day</a>
        </div></div>
        <div id="calendar-list-day-2025-10-07">
          <div class="film-thumbnail">
            <a class="title" href="/film/?vista_film_id=9999000345">The Substance</a>
            <div class="film-metadata">Directed by Coralie Fargeat, 2024, 35mm</div>
            <div class="film-description">With an introduction  by the director.</div>
            <div class="showtimes">
              <a>1:00pm</a><a>4:00pm</a><a>7:00pm</a><a>9:45pm</a>
            </div>
          </div>
          <div class="film-thumbnail">
            <a class="title" href="/film/?vista_film_id=42">Chungking Express</a>
          </div>
          <div class="film-thumbnail"><div class="film-metadata">no title</div></div>
        </div>"#;

    #[test]
    fn picks_only_scheduled_days() {
        assert_eq!(parse_available_dates(LANDING), vec!["2025-10-07", "2025-10-09"]);
    }

    #[test]
    fn parses_film_cards_for_one_day() {
        let listings = parse_day(DAY, "2025-10-07");
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.title, "The Substance");
        assert_eq!(first.showtime, "2025-10-07 (1:00pm, 4:00pm, 7:00pm)");
        assert_eq!(first.director.as_deref(), Some("Coralie Fargeat"));
        assert_eq!(first.year, Some(2024));
        assert_eq!(first.description.as_deref(), Some("With an introduction by the director."));
        assert_eq!(
            first.film_link.as_deref(),
            Some("https://metrograph.com/film/?vista_film_id=9999000345")
        );

        let second = &listings[1];
        assert_eq!(second.showtime, "2025-10-07");
        assert_eq!(second.director, None);
    }

    #[test]
    fn missing_day_section_yields_nothing() {
        assert!(parse_day(DAY, "2025-10-09").is_empty());
    }

    #[test]
    fn metadata_line_variants() {
        assert_eq!(
            parse_metadata("Dir. Wong Kar-wai, 1994, DCP"),
            (Some("Wong Kar-wai".into()), Some(1994))
        );
        assert_eq!(parse_metadata("35mm"), (None, None));
    }
}
