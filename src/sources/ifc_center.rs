//! IFC Center (NYC). The homepage showtimes widget lists one block per day
//! ("Mon Oct 6"); director, year and copy come from each film's detail page,
//! fetched once per film.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{absolute_url, dated_showtime, element_text, has_class, ListingSource, PageFetcher};
use crate::model::{RawListing, Venue};
use crate::normalization::showtime::resolve_short_date;

pub const SOURCE_ID: &str = "ifc_center";
const BASE_URL: &str = "https://www.ifccenter.com";
const MAX_DESCRIPTION_CHARS: usize = 500;
const MIN_DESCRIPTION_CHARS: usize = 20;

static DAILY_SCHEDULE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div#js-showtimes-widget div.daily-schedule").expect("static selector")
});
static DAY_HEADER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3").expect("static selector"));
static FILM_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li").expect("static selector"));
static FILM_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3 a").expect("static selector"));
static TIMES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.times a").expect("static selector"));

static DETAIL_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.film-details li").expect("static selector"));
static DETAIL_LABEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("strong").expect("static selector"));
static DATE_TIME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p.date-time").expect("static selector"));
// Document order lets us find the first paragraph after the title heading.
static TITLE_OR_PARAGRAPH: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1.title, p").expect("static selector"));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("static selector"));

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("static regex"));

/// One film on one day, before detail-page lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub title: String,
    pub film_url: Option<String>,
    pub date: NaiveDate,
    pub times: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilmDetails {
    pub director: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
}

pub struct IfcCenterSource {
    venue: Venue,
    fetcher: PageFetcher,
}

impl IfcCenterSource {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self {
            venue: Venue {
                source_id: SOURCE_ID.into(),
                display_name: "IFC Center".into(),
                location: "323 Sixth Avenue, NYC".into(),
                website: BASE_URL.into(),
            },
            fetcher,
        }
    }

    async fn details(&self, url: &str) -> FilmDetails {
        self.fetcher.pause().await;
        match self.fetcher.get_html(url).await {
            Ok(page) => parse_details(&page),
            Err(err) => {
                warn!(source = SOURCE_ID, %url, error = %err, "detail page failed");
                FilmDetails::default()
            }
        }
    }
}

#[async_trait]
impl ListingSource for IfcCenterSource {
    fn venue(&self) -> &Venue {
        &self.venue
    }

    async fn fetch(&self) -> Result<Vec<RawListing>> {
        let home = self.fetcher.get_html(BASE_URL).await?;
        let entries = parse_schedule(&home, Utc::now().date_naive());
        debug!(source = SOURCE_ID, entries = entries.len(), "schedule parsed");

        let mut cache: HashMap<String, FilmDetails> = HashMap::new();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let details = match &entry.film_url {
                Some(url) => {
                    if !cache.contains_key(url) {
                        let fetched = self.details(url).await;
                        cache.insert(url.clone(), fetched);
                    }
                    cache.get(url).cloned().unwrap_or_default()
                }
                None => FilmDetails::default(),
            };
            out.push(RawListing {
                showtime: dated_showtime(entry.date, &entry.times),
                title: entry.title,
                director: details.director,
                year: details.year,
                description: details.description,
                film_link: entry.film_url,
            });
        }
        Ok(out)
    }
}

/// Day blocks of the homepage widget; "coming soon" is skipped.
pub fn parse_schedule(html: &str, today: NaiveDate) -> Vec<ScheduleEntry> {
    let doc = Html::parse_document(html);
    let mut out = Vec::new();

    for day in doc.select(&DAILY_SCHEDULE) {
        if has_class(day, "show-coming-soon") {
            continue;
        }
        let Some(header) = day.select(&DAY_HEADER).next().map(element_text) else {
            continue;
        };
        let Some(date) = resolve_short_date(&header, today) else {
            debug!(source = SOURCE_ID, %header, "unrecognized day header");
            continue;
        };

        for item in day.select(&FILM_ITEM) {
            let Some(link) = item.select(&FILM_LINK).next() else {
                continue;
            };
            let title = element_text(link);
            if title.chars().count() < 2 {
                continue;
            }
            let times: Vec<String> = item
                .select(&TIMES)
                .map(element_text)
                .filter(|t| !t.is_empty())
                .collect();
            if times.is_empty() {
                continue;
            }
            out.push(ScheduleEntry {
                title,
                film_url: link.value().attr("href").and_then(|h| absolute_url(BASE_URL, h)),
                date,
                times,
            });
        }
    }
    out
}

/// Director, year and opening copy from a film detail page.
pub fn parse_details(html: &str) -> FilmDetails {
    let doc = Html::parse_document(html);
    let mut details = FilmDetails::default();

    for row in doc.select(&DETAIL_ROW) {
        let Some(label_el) = row.select(&DETAIL_LABEL).next() else {
            continue;
        };
        let label_raw: String = label_el.text().collect();
        let label = label_raw.trim().to_lowercase();
        let full: String = row.text().collect();
        let value = crate::canonical::clean_text(&full.replacen(&label_raw, "", 1));
        if label.contains("director") && !value.is_empty() {
            details.director = Some(value);
        }
    }

    let year_in = |text: String| YEAR.find(&text).and_then(|m| m.as_str().parse::<i32>().ok());
    details.year = doc
        .select(&DATE_TIME)
        .next()
        .and_then(|p| year_in(p.text().collect()))
        .or_else(|| doc.select(&BODY).next().and_then(|b| year_in(b.text().collect())));

    let mut seen_title = false;
    for el in doc.select(&TITLE_OR_PARAGRAPH) {
        if el.value().name() == "h1" {
            seen_title = true;
            continue;
        }
        if seen_title {
            let text = element_text(el);
            if text.chars().count() > MIN_DESCRIPTION_CHARS {
                details.description = Some(text.chars().take(MAX_DESCRIPTION_CHARS).collect());
            }
            break;
        }
    }
    details
}
