//! Listing sources: one adapter per theater plus a JSON fixture source.
//!
//! Every adapter implements `ListingSource`; `Source` is the closed set of
//! variants the orchestrator iterates, in registry order.
pub mod fixture;
pub mod ifc_center;
pub mod metrograph;
pub mod syndicated_bk;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::ElementRef;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::canonical::clean_text;
use crate::model::{RawListing, Venue};
use crate::util::env::{env_list, env_opt, env_parse};

pub use fixture::FixtureSource;
pub use ifc_center::IfcCenterSource;
pub use metrograph::MetrographSource;
pub use syndicated_bk::SyndicatedBkSource;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Theater sources registered when `SOURCES` is unset, in run order.
pub const DEFAULT_SOURCES: &[&str] = &[
    metrograph::SOURCE_ID,
    syndicated_bk::SOURCE_ID,
    ifc_center::SOURCE_ID,
];

/// A producer of raw listings. A failure here is contained to this source.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn venue(&self) -> &Venue;

    fn id(&self) -> &str {
        &self.venue().source_id
    }

    /// Perform a fresh fetch. An empty vec means the site currently lists nothing.
    async fn fetch(&self) -> Result<Vec<RawListing>>;
}

/// Registered source variants.
pub enum Source {
    Metrograph(MetrographSource),
    SyndicatedBk(SyndicatedBkSource),
    IfcCenter(IfcCenterSource),
    Fixture(FixtureSource),
}

impl Source {
    fn inner(&self) -> &dyn ListingSource {
        match self {
            Source::Metrograph(s) => s,
            Source::SyndicatedBk(s) => s,
            Source::IfcCenter(s) => s,
            Source::Fixture(s) => s,
        }
    }
}

#[async_trait]
impl ListingSource for Source {
    fn venue(&self) -> &Venue {
        self.inner().venue()
    }

    async fn fetch(&self) -> Result<Vec<RawListing>> {
        self.inner().fetch().await
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sources: Vec<String>,
    pub timeout: Duration,
    pub user_agent: String,
    /// Politeness delay between page fetches inside one adapter.
    pub page_delay: Duration,
    pub fixture_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_delay: Duration::from_millis(500),
            fixture_file: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(list) = env_list("SOURCES").filter(|l| !l.is_empty()) {
            cfg.sources = list;
        }
        cfg.timeout = Duration::from_secs(env_parse("SCRAPER_TIMEOUT_SECS", 15u64).max(1));
        if let Some(ua) = env_opt("SCRAPER_USER_AGENT") {
            cfg.user_agent = ua;
        }
        cfg.page_delay = Duration::from_millis(env_parse("SCRAPER_DELAY_MS", 500u64));
        cfg.fixture_file = env_opt("FIXTURE_FILE").map(PathBuf::from);
        cfg
    }
}

/// Shared HTTP plumbing for the HTML adapters.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
    delay: Duration,
}

impl PageFetcher {
    pub fn new(cfg: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("building scraper http client")?;
        Ok(Self {
            client,
            delay: cfg.page_delay,
        })
    }

    pub async fn get_html(&self, url: &str) -> Result<String> {
        debug!(%url, "fetching page");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        resp.text()
            .await
            .with_context(|| format!("reading body of {url}"))
    }

    /// Sleep between consecutive page fetches.
    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Build the ordered source list named by `cfg.sources`.
///
/// The fixture source is appended when `FIXTURE_FILE` is set, unless the
/// list already names `fixture`. Unknown ids are a configuration error.
pub fn build_sources(cfg: &PipelineConfig) -> Result<Vec<Source>> {
    let fetcher = PageFetcher::new(cfg)?;
    let mut ids: Vec<&str> = cfg.sources.iter().map(String::as_str).collect();
    if cfg.fixture_file.is_some() && !ids.contains(&fixture::SOURCE_ID) {
        ids.push(fixture::SOURCE_ID);
    }

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let source = match id {
            metrograph::SOURCE_ID => Source::Metrograph(MetrographSource::new(fetcher.clone())),
            syndicated_bk::SOURCE_ID => {
                Source::SyndicatedBk(SyndicatedBkSource::new(fetcher.clone()))
            }
            ifc_center::SOURCE_ID => Source::IfcCenter(IfcCenterSource::new(fetcher.clone())),
            fixture::SOURCE_ID => {
                let path = cfg
                    .fixture_file
                    .clone()
                    .ok_or_else(|| anyhow!("source `fixture` requires FIXTURE_FILE"))?;
                Source::Fixture(FixtureSource::new(path))
            }
            other => return Err(anyhow!("unknown source id `{other}`")),
        };
        out.push(source);
    }
    Ok(out)
}

/// Whitespace-normalized text content of an element.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

pub(crate) fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

/// Make `href` absolute against `base` (`https://host`, no trailing slash).
pub(crate) fn absolute_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    url::Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .ok()
}

/// `YYYY-MM-DD (t1, t2)` as the canonicalizer expects it.
pub(crate) fn dated_showtime(date: chrono::NaiveDate, times: &[String]) -> String {
    if times.is_empty() {
        date.format("%Y-%m-%d").to_string()
    } else {
        format!("{} ({})", date.format("%Y-%m-%d"), times.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn builds_sources_in_configured_order() {
        let cfg = PipelineConfig {
            sources: vec!["ifc_center".into(), "metrograph".into()],
            ..Default::default()
        };
        let sources = build_sources(&cfg).unwrap();
        let ids: Vec<_> = sources.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["ifc_center", "metrograph"]);
    }

    #[test]
    fn fixture_is_appended_when_file_configured() {
        let cfg = PipelineConfig {
            sources: vec!["syndicated_bk".into()],
            fixture_file: Some(PathBuf::from("listings.json")),
            ..Default::default()
        };
        let sources = build_sources(&cfg).unwrap();
        let ids: Vec<_> = sources.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["syndicated_bk", "fixture"]);
    }

    #[test]
    fn unknown_or_unconfigured_sources_are_rejected() {
        let cfg = PipelineConfig {
            sources: vec!["film_forum".into()],
            ..Default::default()
        };
        assert!(build_sources(&cfg).is_err());

        let cfg = PipelineConfig {
            sources: vec!["fixture".into()],
            ..Default::default()
        };
        assert!(build_sources(&cfg).is_err());
    }

    #[test]
    fn url_and_showtime_helpers() {
        assert_eq!(
            absolute_url("https://metrograph.com", "/film/?vista_film_id=1").as_deref(),
            Some("https://metrograph.com/film/?vista_film_id=1")
        );
        assert_eq!(
            absolute_url("https://metrograph.com", "https://x.test/a").as_deref(),
            Some("https://x.test/a")
        );
        assert_eq!(absolute_url("https://metrograph.com", "  "), None);

        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        assert_eq!(dated_showtime(date, &[]), "2025-10-06");
        assert_eq!(
            dated_showtime(date, &["1:00pm".into(), "7:30pm".into()]),
            "2025-10-06 (1:00pm, 7:30pm)"
        );
    }
}
