//! Listings read from a local JSON file (seed data and offline runs).
//!
//! The file is a JSON array of listings:
//! `[{"title": "Nosferatu", "showtime": "Now Playing", "director": "Robert Eggers", "year": 2024}]`
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use super::ListingSource;
use crate::model::{RawListing, Venue};

pub const SOURCE_ID: &str = "fixture";

pub struct FixtureSource {
    venue: Venue,
    path: PathBuf,
}

impl FixtureSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            venue: Venue {
                source_id: SOURCE_ID.into(),
                display_name: "Fixture Listings".into(),
                location: String::new(),
                website: String::new(),
            },
            path,
        }
    }
}

pub fn parse_fixture(json: &str) -> Result<Vec<RawListing>> {
    serde_json::from_str(json).context("decoding fixture listings")
}

#[async_trait]
impl ListingSource for FixtureSource {
    fn venue(&self) -> &Venue {
        &self.venue
    }

    async fn fetch(&self) -> Result<Vec<RawListing>> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading fixture file {}", self.path.display()))?;
        parse_fixture(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_listing_array() {
        let listings = parse_fixture(
            r#"[
                {"title": "Nosferatu", "showtime": "Now Playing", "director": "Robert Eggers", "year": 2024},
                {"title": "Perfect Days", "showtime": "Jan 3-9"}
            ]"#,
        )
        .unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].director.as_deref(), Some("Robert Eggers"));
        assert_eq!(listings[1].year, None);
    }

    #[test]
    fn rejects_malformed_file() {
        assert!(parse_fixture(r#"{"title": "not an array"}"#).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_a_source_error() {
        let source = FixtureSource::new(PathBuf::from("/nonexistent/indieflix-fixture.json"));
        let err = source.fetch().await.unwrap_err();
        assert!(err.to_string().contains("reading fixture file"));
    }
}
